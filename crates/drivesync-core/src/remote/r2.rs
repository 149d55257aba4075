//! Cloudflare R2 remote storage over the S3-compatible API.
//!
//! Folders are key prefixes marked by an empty `<prefix>/` object; a file id
//! is the full object key. Uploads use `If-Match` / `If-None-Match: *`, so a
//! concurrent commit from another device is rejected by the service instead
//! of overwritten.

use std::env;
use std::path::Path;

use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectOutput;
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;
use chrono::{DateTime, Utc};

use super::{
    io_error, validate_name, RemoteFile, RemoteFileMetadata, RemoteResult, RemoteStorage,
    UploadOutcome, UploadRequest,
};
use crate::{Error, RemoteError, Result};

const ENV_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
const ENV_BUCKET: &str = "R2_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";

/// Cloudflare R2 configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct R2Config {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// R2 bucket name.
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
}

impl std::fmt::Debug for R2Config {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("R2Config")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl R2Config {
    /// Load R2 configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no R2 variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// Cloudflare R2 S3-compatible endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

/// R2-backed [`RemoteStorage`].
#[derive(Clone, Debug)]
pub struct R2RemoteStorage {
    config: R2Config,
    client: Client,
}

impl R2RemoteStorage {
    #[must_use]
    pub fn new(config: R2Config) -> Self {
        let client = build_s3_client(&config);
        Self { config, client }
    }

    #[must_use]
    pub const fn config(&self) -> &R2Config {
        &self.config
    }

    async fn head(&self, key: &str) -> RemoteResult<Option<HeadObjectOutput>> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output)),
            Err(error) => match classify_sdk_error("head_object", &self.target(key), error) {
                RemoteError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn metadata_for(&self, key: &str) -> RemoteResult<Option<RemoteFileMetadata>> {
        let Some(output) = self.head(key).await? else {
            return Ok(None);
        };
        let modified_time = output
            .last_modified()
            .and_then(|value| DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos()))
            .ok_or_else(|| {
                RemoteError::Service(format!("{} has no last-modified time", self.target(key)))
            })?;
        let size = output
            .content_length()
            .and_then(|length| u64::try_from(length).ok())
            .unwrap_or(0);

        Ok(Some(RemoteFileMetadata {
            id: key.to_string(),
            name: key.rsplit('/').next().unwrap_or(key).to_string(),
            modified_time,
            size,
            etag: output.e_tag().map(ToOwned::to_owned),
        }))
    }

    fn target(&self, key: &str) -> String {
        format!("{}/{key}", self.config.bucket)
    }
}

impl RemoteStorage for R2RemoteStorage {
    async fn get_metadata(&self, file_id: &str) -> RemoteResult<RemoteFileMetadata> {
        let key = normalize_object_key(file_id)?;
        self.metadata_for(&key)
            .await?
            .ok_or_else(|| RemoteError::NotFound(self.target(&key)))
    }

    async fn find_file(
        &self,
        name: &str,
        parent_folder_id: &str,
    ) -> RemoteResult<Option<RemoteFileMetadata>> {
        let key = join_key(Some(parent_folder_id), &validate_name("file", name)?);
        self.metadata_for(&key).await
    }

    async fn upload(&self, request: UploadRequest<'_>) -> RemoteResult<UploadOutcome> {
        let key = join_key(
            request.parent_folder_id,
            &validate_name("file", request.file_name)?,
        );
        let bytes = tokio::fs::read(request.local_path)
            .await
            .map_err(|error| io_error("read upload source", &error))?;
        let existed = self.head(&key).await?.is_some();

        let mut put = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type("application/octet-stream")
            .body(ByteStream::from(bytes));
        put = match request.if_match {
            Some(etag) => put.if_match(etag),
            None if !existed => put.if_none_match("*"),
            None => put,
        };
        put.send()
            .await
            .map_err(|error| classify_sdk_error("put_object", &self.target(&key), error))?;

        let committed = self
            .metadata_for(&key)
            .await?
            .ok_or_else(|| RemoteError::NotFound(self.target(&key)))?;
        let file = RemoteFile {
            file_id: key,
            modified_time: committed.modified_time,
            etag: committed.etag,
        };
        Ok(if existed {
            UploadOutcome::Updated(file)
        } else {
            UploadOutcome::Created(file)
        })
    }

    async fn download(&self, file_id: &str, destination: &Path) -> RemoteResult<()> {
        let key = normalize_object_key(file_id)?;
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|error| classify_sdk_error("get_object", &self.target(&key), error))?;

        let payload = response.body.collect().await.map_err(|error| {
            RemoteError::Network(format!(
                "R2 get_object_body failed for {}: {error}",
                self.target(&key)
            ))
        })?;

        if let Err(error) = tokio::fs::write(destination, payload.into_bytes()).await {
            let _ = tokio::fs::remove_file(destination).await;
            return Err(io_error("write download", &error));
        }
        Ok(())
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> RemoteResult<String> {
        let prefix = join_key(parent_id, &validate_name("folder", name)?);
        let marker = format!("{prefix}/");
        if self.head(&marker).await?.is_none() {
            self.client
                .put_object()
                .bucket(&self.config.bucket)
                .key(&marker)
                .body(ByteStream::from(Vec::new()))
                .send()
                .await
                .map_err(|error| classify_sdk_error("put_object", &self.target(&marker), error))?;
        }
        Ok(prefix)
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<R2Config>> {
    let account_id = lookup(ENV_ACCOUNT_ID).map(|value| value.trim().to_string());
    let bucket = lookup(ENV_BUCKET).map(|value| value.trim().to_string());
    let access_key_id = lookup(ENV_ACCESS_KEY_ID).map(|value| value.trim().to_string());
    let secret_access_key = lookup(ENV_SECRET_ACCESS_KEY).map(|value| value.trim().to_string());

    if account_id.is_none()
        && bucket.is_none()
        && access_key_id.is_none()
        && secret_access_key.is_none()
    {
        return Ok(None);
    }

    let mut missing = Vec::new();
    let mut require = |value: Option<String>, key: &'static str| {
        let value = value.filter(|value| !value.is_empty());
        if value.is_none() {
            missing.push(key);
        }
        value.unwrap_or_default()
    };
    let config = R2Config {
        account_id: require(account_id, ENV_ACCOUNT_ID),
        bucket: require(bucket, ENV_BUCKET),
        access_key_id: require(access_key_id, ENV_ACCESS_KEY_ID),
        secret_access_key: require(secret_access_key, ENV_SECRET_ACCESS_KEY),
    };

    if !missing.is_empty() {
        return Err(Error::InvalidInput(format!(
            "R2 configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    }

    Ok(Some(config))
}

fn build_s3_client(config: &R2Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "drivesync-r2-remote",
    );

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new("auto"))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url())
        .force_path_style(true)
        .build();

    Client::from_conf(sdk_config)
}

/// Sort an SDK failure into the remote error taxonomy by transport failure
/// kind or HTTP status.
fn classify_sdk_error<E>(
    operation: &str,
    target: &str,
    error: SdkError<E, HttpResponse>,
) -> RemoteError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = error.raw_response().map(|response| response.status().as_u16());
    let detail = format!(
        "R2 {operation} failed for {target}: {}",
        DisplayErrorContext(&error)
    );

    if matches!(
        error,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)
    ) {
        return RemoteError::Network(detail);
    }
    match status {
        Some(401 | 403) => RemoteError::Auth(detail),
        Some(404) => RemoteError::NotFound(detail),
        Some(409 | 412) => RemoteError::PreconditionFailed(detail),
        Some(408 | 429 | 502..=504) => RemoteError::Network(detail),
        _ => RemoteError::Service(detail),
    }
}

fn normalize_object_key(object_key: &str) -> RemoteResult<String> {
    let object_key = object_key.trim().trim_matches('/').to_string();
    if object_key.is_empty() {
        return Err(RemoteError::Service(
            "object key cannot be empty".to_string(),
        ));
    }
    Ok(object_key)
}

fn join_key(prefix: Option<&str>, name: &str) -> String {
    match prefix.map(|prefix| prefix.trim_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{name}"),
        _ => name.to_string(),
    }
}
