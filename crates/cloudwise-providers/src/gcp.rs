use crate::error::{ProviderError, Result};
use crate::{NormalizedCostRecord, NormalizedResource};
use chrono::{NaiveDate, Utc};
use cloudwise_common::types::Provider;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const BIGQUERY_HOST: &str = "https://bigquery.googleapis.com";
const ASSET_HOST: &str = "https://cloudasset.googleapis.com";
const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform.read-only";

/// Credential payload stored (encrypted) for a GCP project: the relevant
/// fields of a service-account key file, plus the fully-qualified
/// BigQuery billing export table cost queries run against.
#[derive(Debug, Clone, Deserialize)]
pub struct GcpCredentials {
    pub client_email: String,
    pub private_key: String,
    /// e.g. `myproject.billing.gcp_billing_export_v1_XXXX`. Cost sync is
    /// skipped (with a warning) when the export table is not configured,
    /// since GCP exposes per-service daily cost only through the export.
    #[serde(default)]
    pub billing_export_table: Option<String>,
}

#[derive(Debug)]
pub struct GcpAdapter {
    credentials: GcpCredentials,
    client: Client,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl GcpAdapter {
    pub fn from_credentials_json(credentials_json: &str) -> anyhow::Result<Self> {
        let credentials: GcpCredentials = serde_json::from_str(credentials_json)?;
        if credentials.client_email.is_empty() || credentials.private_key.is_empty() {
            anyhow::bail!("client_email and private_key are required");
        }
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            credentials,
            client,
        })
    }

    /// Service-account JWT bearer flow: sign an assertion with the key
    /// file's RSA key, exchange it for an access token.
    async fn access_token(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iss: &self.credentials.client_email,
            scope: SCOPE,
            aud: TOKEN_URI,
            iat: now,
            exp: now + 3600,
        };
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| ProviderError::SigningError(e.to_string()))?;
        let assertion = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &key,
        )
        .map_err(|e| ProviderError::SigningError(e.to_string()))?;

        let response = self
            .client
            .post(TOKEN_URI)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(ProviderError::InvalidCredentials {
                provider: "gcp".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::HttpError {
                provider: "gcp".to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn get_json(&self, url: &str, token: &str) -> Result<serde_json::Value> {
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                provider: "gcp".to_string(),
            });
        }
        if !status.is_success() {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
                if let Some(error) = json.get("error") {
                    return Err(ProviderError::ApiResponseError {
                        provider: "gcp".to_string(),
                        code: error
                            .get("status")
                            .and_then(|c| c.as_str())
                            .unwrap_or("Unknown")
                            .to_string(),
                        message: error
                            .get("message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("Unknown")
                            .to_string(),
                    });
                }
            }
            return Err(ProviderError::HttpError {
                provider: "gcp".to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Parse a BigQuery query response over the billing export. The query
/// projects exactly four columns: usage date, service description,
/// summed cost, currency — BigQuery returns every cell as a string in
/// `rows[].f[].v`.
pub(crate) fn parse_billing_export_rows(
    project_id: &str,
    json: &serde_json::Value,
) -> Result<Vec<NormalizedCostRecord>> {
    let rows = json
        .get("rows")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();

    let mut records = Vec::new();
    for row in rows {
        let cells: Vec<Option<String>> = row
            .get("f")
            .and_then(|f| f.as_array())
            .map(|fields| {
                fields
                    .iter()
                    .map(|f| f.get("v").and_then(|v| v.as_str()).map(|v| v.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        if cells.len() < 4 {
            continue;
        }
        let Some(date) = cells[0].as_deref().and_then(|d| d.parse::<NaiveDate>().ok()) else {
            continue;
        };
        let service = cells[1].clone().unwrap_or_else(|| "Unknown".to_string());
        let cost = cells[2]
            .as_deref()
            .and_then(|c| c.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);
        let currency = cells[3].clone().unwrap_or_else(|| "USD".to_string());
        records.push(NormalizedCostRecord {
            provider: Provider::Gcp,
            account_id: project_id.to_string(),
            date,
            service,
            cost,
            usage_quantity: None,
            currency,
        });
    }
    Ok(records)
}

/// Parse a Cloud Asset `searchAllResources` response.
pub(crate) fn parse_assets(project_id: &str, json: &serde_json::Value) -> Vec<NormalizedResource> {
    let now = Utc::now();
    json.get("results")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let tags: HashMap<String, String> = item
                .get("labels")
                .and_then(|l| l.as_object())
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            Some(NormalizedResource {
                provider: Provider::Gcp,
                account_id: project_id.to_string(),
                resource_id: name,
                name: item
                    .get("displayName")
                    .and_then(|n| n.as_str())
                    .map(|n| n.to_string()),
                resource_type: item
                    .get("assetType")
                    .and_then(|t| t.as_str())
                    .unwrap_or("Unknown")
                    .to_string(),
                region: item
                    .get("location")
                    .and_then(|l| l.as_str())
                    .unwrap_or("global")
                    .to_string(),
                status: item
                    .get("state")
                    .and_then(|s| s.as_str())
                    .map(|s| s.to_lowercase())
                    .unwrap_or_else(|| "running".to_string()),
                utilization: None,
                cost_per_month: Decimal::ZERO,
                tags,
                metrics: serde_json::json!({}),
                observed_at: now,
            })
        })
        .collect()
}

/// The export table name is interpolated into the query; reject anything
/// that is not a plain dotted identifier before it gets near SQL.
fn validate_table_name(table: &str) -> Result<&str> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(table)
    } else {
        Err(ProviderError::ConfigError(format!(
            "invalid billing export table name: {table}"
        )))
    }
}

#[async_trait::async_trait]
impl crate::ProviderAdapter for GcpAdapter {
    fn provider(&self) -> Provider {
        Provider::Gcp
    }

    async fn validate_credentials(&self) -> Result<()> {
        self.access_token().await.map(|_| ())
    }

    async fn fetch_cost_and_usage(
        &self,
        external_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NormalizedCostRecord>> {
        let Some(table) = self.credentials.billing_export_table.as_deref() else {
            tracing::warn!(
                project = %external_id,
                "No billing export table configured; skipping GCP cost sync"
            );
            return Ok(Vec::new());
        };
        let table = validate_table_name(table)?;
        let token = self.access_token().await?;

        let query = format!(
            "SELECT FORMAT_DATE('%Y-%m-%d', DATE(usage_start_time)) AS usage_date, \
             service.description AS service, \
             CAST(SUM(cost) AS STRING) AS cost, \
             currency \
             FROM `{table}` \
             WHERE project.id = @project_id \
             AND DATE(usage_start_time) BETWEEN @start_date AND @end_date \
             GROUP BY usage_date, service, currency \
             ORDER BY usage_date"
        );
        let body = serde_json::json!({
            "query": query,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": [
                {
                    "name": "project_id",
                    "parameterType": {"type": "STRING"},
                    "parameterValue": {"value": external_id}
                },
                {
                    "name": "start_date",
                    "parameterType": {"type": "DATE"},
                    "parameterValue": {"value": start.to_string()}
                },
                {
                    "name": "end_date",
                    "parameterType": {"type": "DATE"},
                    "parameterValue": {"value": end.to_string()}
                }
            ]
        });

        let url = format!("{BIGQUERY_HOST}/bigquery/v2/projects/{external_id}/queries");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::HttpError {
                provider: "gcp".to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        let json: serde_json::Value = serde_json::from_str(&text)?;
        parse_billing_export_rows(external_id, &json)
    }

    async fn fetch_resources(&self, external_id: &str) -> Result<Vec<NormalizedResource>> {
        let token = self.access_token().await?;
        let url = format!("{ASSET_HOST}/v1/projects/{external_id}:searchAllResources");
        let json = self.get_json(&url, &token).await?;
        Ok(parse_assets(external_id, &json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_billing_export_rows() {
        let json = serde_json::json!({
            "rows": [
                {"f": [
                    {"v": "2024-01-05"},
                    {"v": "Compute Engine"},
                    {"v": "42.1234"},
                    {"v": "USD"}
                ]},
                {"f": [
                    {"v": "2024-01-05"},
                    {"v": "Cloud Storage"},
                    {"v": "0.10"},
                    {"v": "USD"}
                ]}
            ]
        });
        let records = parse_billing_export_rows("my-project", &json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].service, "Compute Engine");
        assert_eq!(records[0].cost, dec!(42.1234));
        assert_eq!(records[0].account_id, "my-project");
    }

    #[test]
    fn skips_malformed_rows() {
        let json = serde_json::json!({
            "rows": [
                {"f": [{"v": "not-a-date"}, {"v": "x"}, {"v": "1"}, {"v": "USD"}]},
                {"f": [{"v": "2024-01-05"}]}
            ]
        });
        let records = parse_billing_export_rows("my-project", &json).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn parses_asset_search_results() {
        let json = serde_json::json!({
            "results": [
                {
                    "name": "//compute.googleapis.com/projects/p/zones/us-central1-a/instances/vm-1",
                    "displayName": "vm-1",
                    "assetType": "compute.googleapis.com/Instance",
                    "location": "us-central1-a",
                    "state": "RUNNING",
                    "labels": {"team": "data"}
                }
            ]
        });
        let resources = parse_assets("my-project", &json);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].status, "running");
        assert_eq!(resources[0].region, "us-central1-a");
        assert_eq!(resources[0].tags.get("team").map(String::as_str), Some("data"));
    }

    #[test]
    fn rejects_suspicious_table_names() {
        assert!(validate_table_name("proj.billing.export_v1").is_ok());
        assert!(validate_table_name("evil` ; DROP TABLE x").is_err());
        assert!(validate_table_name("").is_err());
    }
}
