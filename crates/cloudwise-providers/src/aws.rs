use crate::error::{ProviderError, Result};
use crate::{NormalizedCostRecord, NormalizedResource};
use chrono::{NaiveDate, Utc};
use cloudwise_common::types::Provider;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

const CE_SERVICE: &str = "ce";
const CE_HOST: &str = "ce.us-east-1.amazonaws.com";
const CE_REGION: &str = "us-east-1";
const CE_TARGET_PREFIX: &str = "AWSInsightsIndexService";
const TAGGING_SERVICE: &str = "tagging";
const TAGGING_TARGET_PREFIX: &str = "ResourceGroupsTaggingAPI_20170126";
const STS_HOST: &str = "sts.amazonaws.com";

/// Credential payload stored (encrypted) for an AWS account.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug)]
pub struct AwsAdapter {
    credentials: AwsCredentials,
    client: Client,
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ProviderError::SigningError(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

impl AwsAdapter {
    pub fn from_credentials_json(credentials_json: &str) -> anyhow::Result<Self> {
        let credentials: AwsCredentials = serde_json::from_str(credentials_json)?;
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            credentials,
            client,
        })
    }

    /// AWS Signature Version 4 for a POST with canonical URI `/`.
    fn sign_v4(
        &self,
        service: &str,
        host: &str,
        region: &str,
        amz_date: &str,
        date_stamp: &str,
        extra_headers: &[(&str, &str)],
        payload: &str,
    ) -> Result<String> {
        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), host.to_string()),
            ("x-amz-date".to_string(), amz_date.to_string()),
        ];
        for (k, v) in extra_headers {
            headers.push((k.to_lowercase(), v.to_string()));
        }
        headers.sort();

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect();
        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let hashed_payload = format!("{:x}", Sha256::digest(payload.as_bytes()));
        let canonical_request = format!(
            "POST\n/\n\n{canonical_headers}\n{signed_headers}\n{hashed_payload}"
        );
        let hashed_canonical_request =
            format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

        let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{hashed_canonical_request}"
        );

        let secret_date = hmac_sha256(
            format!("AWS4{}", self.credentials.secret_access_key).as_bytes(),
            date_stamp.as_bytes(),
        )?;
        let secret_region = hmac_sha256(&secret_date, region.as_bytes())?;
        let secret_service = hmac_sha256(&secret_region, service.as_bytes())?;
        let secret_signing = hmac_sha256(&secret_service, b"aws4_request")?;
        let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?);

        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.credentials.access_key_id
        ))
    }

    /// Call a JSON-RPC style AWS API (Cost Explorer, Tagging API).
    async fn call_json_api(
        &self,
        service: &str,
        host: &str,
        region: &str,
        target: &str,
        payload: &str,
    ) -> Result<serde_json::Value> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let content_type = "application/x-amz-json-1.1";

        let authorization = self.sign_v4(
            service,
            host,
            region,
            &amz_date,
            &date_stamp,
            &[("content-type", content_type), ("x-amz-target", target)],
            payload,
        )?;

        let response = self
            .client
            .post(format!("https://{host}/"))
            .header("Content-Type", content_type)
            .header("X-Amz-Date", &amz_date)
            .header("X-Amz-Target", target)
            .header("Authorization", authorization)
            .body(payload.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                provider: "aws".to_string(),
            });
        }
        if status.as_u16() == 403 {
            return Err(ProviderError::InvalidCredentials {
                provider: "aws".to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::HttpError {
                provider: "aws".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = serde_json::from_str(&body)?;
        if let Some(error_type) = json.get("__type").and_then(|t| t.as_str()) {
            return Err(ProviderError::ApiResponseError {
                provider: "aws".to_string(),
                code: error_type.to_string(),
                message: json
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("Unknown")
                    .to_string(),
            });
        }
        Ok(json)
    }
}

/// Parse a Cost Explorer `GetCostAndUsage` response (DAILY granularity,
/// grouped by SERVICE) into normalized records. Zero-cost groups are
/// kept — a service that billed 0.00 on a day is still a fact row.
pub(crate) fn parse_cost_and_usage(
    account_id: &str,
    json: &serde_json::Value,
) -> Result<Vec<NormalizedCostRecord>> {
    let mut records = Vec::new();
    let results = json
        .get("ResultsByTime")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();

    for result in results {
        let Some(date_str) = result
            .pointer("/TimePeriod/Start")
            .and_then(|d| d.as_str())
        else {
            continue;
        };
        let Ok(date) = date_str.parse::<NaiveDate>() else {
            tracing::warn!(date = %date_str, "Skipping cost result with unparseable date");
            continue;
        };
        let groups = result
            .get("Groups")
            .and_then(|g| g.as_array())
            .cloned()
            .unwrap_or_default();
        for group in groups {
            let service = group
                .pointer("/Keys/0")
                .and_then(|k| k.as_str())
                .unwrap_or("Unknown")
                .to_string();
            let amount = group
                .pointer("/Metrics/UnblendedCost/Amount")
                .and_then(|a| a.as_str())
                .unwrap_or("0");
            let currency = group
                .pointer("/Metrics/UnblendedCost/Unit")
                .and_then(|u| u.as_str())
                .unwrap_or("USD")
                .to_string();
            let usage = group
                .pointer("/Metrics/UsageQuantity/Amount")
                .and_then(|a| a.as_str())
                .and_then(|a| a.parse::<Decimal>().ok());
            let cost = amount.parse::<Decimal>().map_err(|e| {
                ProviderError::ApiResponseError {
                    provider: "aws".to_string(),
                    code: "UnparseableAmount".to_string(),
                    message: format!("{amount}: {e}"),
                }
            })?;
            records.push(NormalizedCostRecord {
                provider: Provider::Aws,
                account_id: account_id.to_string(),
                date,
                service,
                cost,
                usage_quantity: usage,
                currency,
            });
        }
    }
    Ok(records)
}

/// Parse a Resource Groups Tagging API `GetResources` response.
pub(crate) fn parse_resources(
    account_id: &str,
    region: &str,
    json: &serde_json::Value,
) -> Vec<NormalizedResource> {
    let now = Utc::now();
    json.get("ResourceTagMappingList")
        .and_then(|l| l.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| {
            let arn = item.get("ResourceARN")?.as_str()?.to_string();
            // arn:aws:service:region:account:resource
            let mut parts = arn.splitn(6, ':');
            let (_, _, service) = (parts.next()?, parts.next()?, parts.next()?.to_string());
            let arn_region = parts.next().unwrap_or("").to_string();
            let tags: HashMap<String, String> = item
                .get("Tags")
                .and_then(|t| t.as_array())
                .map(|tags| {
                    tags.iter()
                        .filter_map(|t| {
                            Some((
                                t.get("Key")?.as_str()?.to_string(),
                                t.get("Value")?.as_str()?.to_string(),
                            ))
                        })
                        .collect()
                })
                .unwrap_or_default();
            let name = tags.get("Name").cloned();
            Some(NormalizedResource {
                provider: Provider::Aws,
                account_id: account_id.to_string(),
                resource_id: arn,
                name,
                resource_type: service,
                region: if arn_region.is_empty() {
                    region.to_string()
                } else {
                    arn_region.to_string()
                },
                status: "running".to_string(),
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
impl crate::ProviderAdapter for AwsAdapter {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    async fn validate_credentials(&self) -> Result<()> {
        // Cheapest authenticated call: STS GetCallerIdentity. A signed
        // request that comes back 2xx proves the key pair is live; the
        // XML body is not interesting.
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let payload = "Action=GetCallerIdentity&Version=2011-06-15";
        let content_type = "application/x-www-form-urlencoded";

        let authorization = self.sign_v4(
            "sts",
            STS_HOST,
            "us-east-1",
            &amz_date,
            &date_stamp,
            &[("content-type", content_type)],
            payload,
        )?;

        let response = self
            .client
            .post(format!("https://{STS_HOST}/"))
            .header("Content-Type", content_type)
            .header("X-Amz-Date", &amz_date)
            .header("Authorization", authorization)
            .body(payload)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::InvalidCredentials {
                provider: "aws".to_string(),
            })
        }
    }

    async fn fetch_cost_and_usage(
        &self,
        external_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NormalizedCostRecord>> {
        // Cost Explorer's End is exclusive
        let end_exclusive = end.succ_opt().unwrap_or(end);
        let payload = serde_json::json!({
            "TimePeriod": {
                "Start": start.to_string(),
                "End": end_exclusive.to_string(),
            },
            "Granularity": "DAILY",
            "Metrics": ["UnblendedCost", "UsageQuantity"],
            "GroupBy": [{"Type": "DIMENSION", "Key": "SERVICE"}],
            "Filter": {
                "Dimensions": {"Key": "LINKED_ACCOUNT", "Values": [external_id]}
            }
        })
        .to_string();

        let json = self
            .call_json_api(
                CE_SERVICE,
                CE_HOST,
                CE_REGION,
                &format!("{CE_TARGET_PREFIX}.GetCostAndUsage"),
                &payload,
            )
            .await?;
        parse_cost_and_usage(external_id, &json)
    }

    async fn fetch_resources(&self, external_id: &str) -> Result<Vec<NormalizedResource>> {
        let host = format!("tagging.{}.amazonaws.com", self.credentials.region);
        let payload = serde_json::json!({"ResourcesPerPage": 100}).to_string();
        let json = self
            .call_json_api(
                TAGGING_SERVICE,
                &host,
                &self.credentials.region,
                &format!("{TAGGING_TARGET_PREFIX}.GetResources"),
                &payload,
            )
            .await?;
        Ok(parse_resources(
            external_id,
            &self.credentials.region,
            &json,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_cost_and_usage_response() {
        let json = serde_json::json!({
            "ResultsByTime": [
                {
                    "TimePeriod": {"Start": "2024-01-01", "End": "2024-01-02"},
                    "Groups": [
                        {
                            "Keys": ["Amazon Elastic Compute Cloud - Compute"],
                            "Metrics": {
                                "UnblendedCost": {"Amount": "12.3456", "Unit": "USD"},
                                "UsageQuantity": {"Amount": "24", "Unit": "Hrs"}
                            }
                        },
                        {
                            "Keys": ["Amazon Simple Storage Service"],
                            "Metrics": {
                                "UnblendedCost": {"Amount": "0.50", "Unit": "USD"}
                            }
                        }
                    ]
                }
            ]
        });
        let records = parse_cost_and_usage("111111111111", &json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(records[0].cost, dec!(12.3456));
        assert_eq!(records[0].usage_quantity, Some(dec!(24)));
        assert_eq!(records[1].service, "Amazon Simple Storage Service");
        assert_eq!(records[1].usage_quantity, None);
    }

    #[test]
    fn unparseable_amount_is_an_api_error() {
        let json = serde_json::json!({
            "ResultsByTime": [{
                "TimePeriod": {"Start": "2024-01-01", "End": "2024-01-02"},
                "Groups": [{
                    "Keys": ["EC2"],
                    "Metrics": {"UnblendedCost": {"Amount": "NaN-ish", "Unit": "USD"}}
                }]
            }]
        });
        assert!(parse_cost_and_usage("111111111111", &json).is_err());
    }

    #[test]
    fn parses_tagged_resources() {
        let json = serde_json::json!({
            "ResourceTagMappingList": [
                {
                    "ResourceARN": "arn:aws:ec2:us-east-1:111111111111:instance/i-0abc",
                    "Tags": [
                        {"Key": "Name", "Value": "web-1"},
                        {"Key": "env", "Value": "prod"}
                    ]
                },
                {
                    "ResourceARN": "arn:aws:s3:::my-bucket",
                    "Tags": []
                }
            ]
        });
        let resources = parse_resources("111111111111", "us-east-1", &json);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name.as_deref(), Some("web-1"));
        assert_eq!(resources[0].resource_type, "ec2");
        assert_eq!(resources[0].region, "us-east-1");
        assert_eq!(resources[0].tags.get("env").map(String::as_str), Some("prod"));
        // S3 ARNs carry no region; fall back to the configured one
        assert_eq!(resources[1].region, "us-east-1");
    }
}
