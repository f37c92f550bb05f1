//! Implements the upload of archives to [S3].

use std::env;
use std::path::Path;

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use derive_more::{Display, Error};

use crate::backends::Uploader;

const ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
const SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
const FALLBACK_REGION: &str = "us-east-1";

/// Uploads archives into an S3 bucket.
///
/// Credentials are taken from `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`
/// at the time of the upload, so a run without upload never reads them.
#[derive(Debug, Clone, Default)]
pub struct S3 {
    /// Region of the bucket. Defaults to the region of the AWS environment.
    pub region: Option<String>,
    /// Endpoint of an S3 compatible store, addressed path-style.
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Display, Error)]
/// Errors on upload to [S3].
pub enum S3Error {
    /// A credential variable is not set.
    #[display("Environment variable {_0} is not set")]
    MissingCredential(#[error(ignore)] &'static str),
    /// The async runtime for the client couldn't be started.
    #[display("Starting the upload runtime failed: {_0}")]
    Runtime(std::io::Error),
    /// The archive couldn't be read.
    #[display("Reading {} failed: {_1}", _0.display())]
    Archive(
        std::path::PathBuf,
        #[error(source)] aws_sdk_s3::primitives::ByteStreamError,
    ),
    /// The request failed.
    #[display("Storing {key} in {bucket} failed: {message}")]
    Put {
        #[error(ignore)]
        bucket: String,
        #[error(ignore)]
        key: String,
        #[error(ignore)]
        message: String,
    },
}

impl S3 {
    fn credentials() -> Result<Credentials, S3Error> {
        let access_key_id =
            env::var(ACCESS_KEY_ID).map_err(|_| S3Error::MissingCredential(ACCESS_KEY_ID))?;
        let secret_access_key = env::var(SECRET_ACCESS_KEY)
            .map_err(|_| S3Error::MissingCredential(SECRET_ACCESS_KEY))?;

        Ok(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "environment",
        ))
    }

    async fn client(&self, credentials: Credentials) -> Client {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).credentials_provider(credentials);
        if let Some(region) = &self.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if sdk_config.region().is_none() {
            log::debug!(target: "backend::s3", "No region configured, using {FALLBACK_REGION}");
            s3_config = s3_config.region(aws_config::Region::new(FALLBACK_REGION));
        }
        if self.endpoint_url.is_some() {
            s3_config = s3_config.force_path_style(true);
        }

        Client::from_conf(s3_config.build())
    }

    async fn put(
        &self,
        credentials: Credentials,
        bucket: &str,
        key: &str,
        archive: &Path,
    ) -> Result<(), S3Error> {
        let client = self.client(credentials).await;
        let body = ByteStream::from_path(archive)
            .await
            .map_err(|e| S3Error::Archive(archive.to_path_buf(), e))?;

        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/gzip")
            .body(body)
            .send()
            .await
            .map_err(|e| S3Error::Put {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: aws_sdk_s3::error::DisplayErrorContext(e).to_string(),
            })?;

        Ok(())
    }
}

impl Uploader for S3 {
    type Error = S3Error;

    fn upload(&self, target: &str, key: &str, archive: &Path) -> Result<(), S3Error> {
        log::info!(target: "backend::s3", "Pushing {} to {key} in {target}.", archive.display());
        let credentials = Self::credentials()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(S3Error::Runtime)?;
        runtime.block_on(self.put(credentials, target, key, archive))?;

        log::info!(target: "backend::s3", "Stored {key} in {target}.");
        Ok(())
    }
}
