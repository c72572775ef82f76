//! S3-backed object store

use super::{Encryption, ObjectStore, TransferError};
use crate::config::TargetConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::put_object::PutObjectError,
    primitives::ByteStream,
    types::ServerSideEncryption,
    Client,
};
use std::path::Path;
use tracing::{debug, info, instrument};

const DEFAULT_REGION: &str = "us-east-1";

/// Error codes S3 uses for throttling and server-side hiccups
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "InternalError",
    "ServiceUnavailable",
];

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client from the config
    ///
    /// Credentials come from the explicit key pair when present, then the
    /// named profile, then the default provider chain. A custom endpoint
    /// switches to path-style addressing.
    pub async fn from_config(config: &TargetConfig) -> anyhow::Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        match (&config.aws_access_key_id, &config.aws_secret_access_key) {
            (Some(access_key), Some(secret_key)) if !access_key.is_empty() => {
                debug!("Using credentials from config");
                loader = loader.credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    config.aws_session_token.clone(),
                    None,
                    "target-s3-csv",
                ));
            },
            _ => {
                if let Some(profile) = config.aws_profile.as_deref().filter(|p| !p.is_empty()) {
                    debug!("Using AWS profile {}", profile);
                    loader = loader.profile_name(profile);
                }
            },
        }

        if let Some(region) = &config.aws_region {
            loader = loader.region(Region::new(region.clone()));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if shared.region().is_none() {
            builder = builder.region(Region::new(DEFAULT_REGION));
        }
        if let Some(endpoint) = config.aws_endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        info!("S3 client initialized for bucket: {}", config.s3_bucket());

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, encryption))]
    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        encryption: &Encryption,
    ) -> Result<(), TransferError> {
        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            TransferError::Fatal(format!("Cannot read {}: {}", local_path.display(), e))
        })?;

        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body);

        if let Encryption::Kms { key_id } = encryption {
            request = request.server_side_encryption(ServerSideEncryption::AwsKms);
            if let Some(key_id) = key_id {
                request = request.ssekms_key_id(key_id);
            }
        }

        request.send().await.map_err(classify)?;

        info!("Successfully uploaded to s3://{}/{}", bucket, key);
        Ok(())
    }
}

fn classify(err: SdkError<PutObjectError, HttpResponse>) -> TransferError {
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => true,
        SdkError::ServiceError(service) => {
            is_transient_response(service.raw().status().as_u16(), service.err().code())
        },
        _ => false,
    };

    let reason = DisplayErrorContext(&err).to_string();
    if transient {
        TransferError::Transient(reason)
    } else {
        TransferError::Fatal(reason)
    }
}

/// Throttling, timeouts and 5xx responses are worth another attempt
fn is_transient_response(status: u16, code: Option<&str>) -> bool {
    status == 429
        || status >= 500
        || code.is_some_and(|code| TRANSIENT_CODES.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_responses() {
        assert!(is_transient_response(503, Some("SlowDown")));
        assert!(is_transient_response(500, None));
        assert!(is_transient_response(429, None));
        assert!(is_transient_response(400, Some("RequestTimeout")));
    }

    #[test]
    fn test_fatal_responses() {
        assert!(!is_transient_response(403, Some("AccessDenied")));
        assert!(!is_transient_response(404, Some("NoSuchBucket")));
        assert!(!is_transient_response(400, Some("InvalidArgument")));
    }
}
