use crate::error::{ProviderError, Result};
use crate::{NormalizedCostRecord, NormalizedResource};
use chrono::{NaiveDate, Utc};
use cloudwise_common::types::Provider;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

const LOGIN_HOST: &str = "https://login.microsoftonline.com";
const MANAGEMENT_HOST: &str = "https://management.azure.com";
const COST_API_VERSION: &str = "2023-11-01";
const RESOURCES_API_VERSION: &str = "2021-04-01";

/// Credential payload stored (encrypted) for an Azure subscription:
/// an AAD app registration with Cost Management Reader access.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug)]
pub struct AzureAdapter {
    credentials: AzureCredentials,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl AzureAdapter {
    pub fn from_credentials_json(credentials_json: &str) -> anyhow::Result<Self> {
        let credentials: AzureCredentials = serde_json::from_str(credentials_json)?;
        if credentials.tenant_id.is_empty()
            || credentials.client_id.is_empty()
            || credentials.client_secret.is_empty()
        {
            anyhow::bail!("tenant_id, client_id, and client_secret are all required");
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

    /// OAuth2 client-credentials flow against AAD.
    async fn access_token(&self) -> Result<String> {
        let url = format!(
            "{LOGIN_HOST}/{}/oauth2/v2.0/token",
            self.credentials.tenant_id
        );
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", "https://management.azure.com/.default"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(ProviderError::InvalidCredentials {
                provider: "azure".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::HttpError {
                provider: "azure".to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn request_json(
        &self,
        method: reqwest::Method,
        url: &str,
        token: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let mut req = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                provider: "azure".to_string(),
            });
        }
        if !status.is_success() {
            // ARM wraps failures in {"error": {"code": ..., "message": ...}}
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
                if let Some(error) = json.get("error") {
                    return Err(ProviderError::ApiResponseError {
                        provider: "azure".to_string(),
                        code: error
                            .get("code")
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
                provider: "azure".to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Parse a Cost Management query response (daily granularity, grouped by
/// ServiceName) into normalized records. The response is columnar:
/// `properties.columns` names the fields, `properties.rows` carries
/// positional values.
pub(crate) fn parse_cost_query(
    subscription_id: &str,
    json: &serde_json::Value,
) -> Result<Vec<NormalizedCostRecord>> {
    let columns = json
        .pointer("/properties/columns")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();
    let index_of = |name: &str| {
        columns.iter().position(|c| {
            c.get("name")
                .and_then(|n| n.as_str())
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
    };
    let (Some(cost_idx), Some(date_idx), Some(service_idx)) = (
        index_of("Cost"),
        index_of("UsageDate"),
        index_of("ServiceName"),
    ) else {
        return Err(ProviderError::ApiResponseError {
            provider: "azure".to_string(),
            code: "MissingColumns".to_string(),
            message: "Cost/UsageDate/ServiceName columns absent from query response".to_string(),
        });
    };
    let currency_idx = index_of("Currency");

    let rows = json
        .pointer("/properties/rows")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();

    let mut records = Vec::new();
    for row in rows {
        let Some(cells) = row.as_array() else { continue };
        // UsageDate comes back as a yyyymmdd number
        let Some(date) = cells
            .get(date_idx)
            .and_then(|d| d.as_i64())
            .and_then(|d| NaiveDate::parse_from_str(&d.to_string(), "%Y%m%d").ok())
        else {
            continue;
        };
        let cost = match cells.get(cost_idx) {
            Some(serde_json::Value::Number(n)) => n
                .to_string()
                .parse::<Decimal>()
                .unwrap_or(Decimal::ZERO),
            Some(serde_json::Value::String(s)) => s.parse::<Decimal>().unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        };
        let service = cells
            .get(service_idx)
            .and_then(|s| s.as_str())
            .unwrap_or("Unknown")
            .to_string();
        let currency = currency_idx
            .and_then(|i| cells.get(i))
            .and_then(|c| c.as_str())
            .unwrap_or("USD")
            .to_string();
        records.push(NormalizedCostRecord {
            provider: Provider::Azure,
            account_id: subscription_id.to_string(),
            date,
            service,
            cost,
            usage_quantity: None,
            currency,
        });
    }
    Ok(records)
}

/// Parse an ARM resource list into normalized resources.
pub(crate) fn parse_resources(
    subscription_id: &str,
    json: &serde_json::Value,
) -> Vec<NormalizedResource> {
    let now = Utc::now();
    json.get("value")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| {
            let id = item.get("id")?.as_str()?.to_string();
            let resource_type = item
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("Unknown")
                .to_string();
            let tags: HashMap<String, String> = item
                .get("tags")
                .and_then(|t| t.as_object())
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            Some(NormalizedResource {
                provider: Provider::Azure,
                account_id: subscription_id.to_string(),
                resource_id: id,
                name: item
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(|n| n.to_string()),
                resource_type,
                region: item
                    .get("location")
                    .and_then(|l| l.as_str())
                    .unwrap_or("global")
                    .to_string(),
                status: item
                    .pointer("/properties/provisioningState")
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

#[async_trait::async_trait]
impl crate::ProviderAdapter for AzureAdapter {
    fn provider(&self) -> Provider {
        Provider::Azure
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
        let token = self.access_token().await?;
        let url = format!(
            "{MANAGEMENT_HOST}/subscriptions/{external_id}/providers/Microsoft.CostManagement/query?api-version={COST_API_VERSION}"
        );
        let body = serde_json::json!({
            "type": "ActualCost",
            "timeframe": "Custom",
            "timePeriod": {
                "from": format!("{start}T00:00:00Z"),
                "to": format!("{end}T23:59:59Z"),
            },
            "dataset": {
                "granularity": "Daily",
                "aggregation": {
                    "totalCost": {"name": "Cost", "function": "Sum"}
                },
                "grouping": [
                    {"type": "Dimension", "name": "ServiceName"}
                ]
            }
        });
        let json = self
            .request_json(reqwest::Method::POST, &url, &token, Some(body))
            .await?;
        parse_cost_query(external_id, &json)
    }

    async fn fetch_resources(&self, external_id: &str) -> Result<Vec<NormalizedResource>> {
        let token = self.access_token().await?;
        let url = format!(
            "{MANAGEMENT_HOST}/subscriptions/{external_id}/resources?api-version={RESOURCES_API_VERSION}"
        );
        let json = self
            .request_json(reqwest::Method::GET, &url, &token, None)
            .await?;
        Ok(parse_resources(external_id, &json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_columnar_cost_response() {
        let json = serde_json::json!({
            "properties": {
                "columns": [
                    {"name": "Cost", "type": "Number"},
                    {"name": "UsageDate", "type": "Number"},
                    {"name": "ServiceName", "type": "String"},
                    {"name": "Currency", "type": "String"}
                ],
                "rows": [
                    [14.5, 20240105, "Virtual Machines", "USD"],
                    [0.75, 20240105, "Storage", "USD"],
                    [3.0, 20240106, "Virtual Machines", "USD"]
                ]
            }
        });
        let records = parse_cost_query("sub-1", &json).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(records[0].service, "Virtual Machines");
        assert_eq!(records[0].cost, dec!(14.5));
        assert_eq!(records[2].date, NaiveDate::from_ymd_opt(2024, 1, 6).unwrap());
    }

    #[test]
    fn missing_columns_is_an_api_error() {
        let json = serde_json::json!({
            "properties": {"columns": [{"name": "Cost"}], "rows": []}
        });
        assert!(matches!(
            parse_cost_query("sub-1", &json),
            Err(ProviderError::ApiResponseError { .. })
        ));
    }

    #[test]
    fn parses_resource_list() {
        let json = serde_json::json!({
            "value": [
                {
                    "id": "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-1",
                    "name": "vm-1",
                    "type": "Microsoft.Compute/virtualMachines",
                    "location": "westeurope",
                    "tags": {"env": "prod"},
                    "properties": {"provisioningState": "Succeeded"}
                }
            ]
        });
        let resources = parse_resources("sub-1", &json);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name.as_deref(), Some("vm-1"));
        assert_eq!(resources[0].region, "westeurope");
        assert_eq!(resources[0].status, "succeeded");
        assert_eq!(resources[0].tags.get("env").map(String::as_str), Some("prod"));
    }
}
