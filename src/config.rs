//! AWS connection settings.

use tracing::debug;

/// Where DynamoDB requests go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsConfig {
    /// Custom endpoint URL (for DynamoDB Local).
    pub endpoint_url: Option<String>,
    /// Region override; the AWS default chain decides when `None`.
    pub region: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok(),
            region: std::env::var("AWS_REGION").ok(),
        }
    }
}

impl AwsConfig {
    /// Returns a display string for the target environment.
    pub fn target_display(&self) -> String {
        match (&self.endpoint_url, &self.region) {
            (Some(url), _) => format!("Local DynamoDB ({url})"),
            (None, Some(region)) => format!("AWS DynamoDB (region: {region})"),
            (None, None) => "AWS DynamoDB (default region)".to_string(),
        }
    }

    /// Loads shared SDK configuration with the overrides applied.
    pub async fn load(&self) -> aws_config::SdkConfig {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &self.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        debug!("Loading AWS configuration for {}", self.target_display());
        loader.load().await
    }
}
