use std::path::Path;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client as S3Client, Config};
use tokio::runtime::Runtime;

use super::{newest_first, Destination, DestinationError, StoredFile};
use crate::model::ObjectStorageConfig;

/// Stores artifacts in an S3 compatible bucket.
///
/// The SDK is async, the engine is not: every call is driven to completion
/// on a private current-thread runtime.
pub struct ObjectStorageDestination {
    client: S3Client,
    bucket: String,
    scope: Option<String>,
    runtime: Runtime,
}

impl ObjectStorageDestination {
    pub fn new(config: &ObjectStorageConfig, scope: Option<&str>) -> Result<Self, DestinationError> {
        let credentials = Credentials::new(
            config.access_key.reveal()?,
            config.secret_key.reveal()?,
            None,
            None,
            "ssh-backup",
        );
        let mut builder = Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style)
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            let endpoint = if endpoint.starts_with("http") {
                endpoint.clone()
            } else {
                format!("https://{endpoint}")
            };
            builder = builder.endpoint_url(endpoint);
        }

        Self::with_client(S3Client::from_conf(builder.build()), &config.bucket, scope)
    }

    /// Driver for `bucket` on an already configured client.
    pub fn with_client(
        client: S3Client,
        bucket: &str,
        scope: Option<&str>,
    ) -> Result<Self, DestinationError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            scope: scope.map(str::to_string),
            runtime,
        })
    }
}

impl Destination for ObjectStorageDestination {
    fn list_files(&self, pattern: &str) -> Result<Vec<StoredFile>, DestinationError> {
        let prefix = self
            .scope
            .as_deref()
            .map(|scope| scope.trim_matches('/'))
            .filter(|scope| !scope.is_empty())
            .map(|scope| format!("{scope}/"));

        let mut files = vec![];
        let mut continuation_token = None;
        loop {
            let response = self
                .runtime
                .block_on(
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .set_prefix(prefix.clone())
                        .set_continuation_token(continuation_token.take())
                        .send(),
                )
                .map_err(|e| {
                    DestinationError::ObjectStorage(format!("Failed to list objects: {e}"))
                })?;

            files.extend(response.contents().iter().filter_map(|object| {
                let key = object.key()?;
                let file_name = key.rsplit('/').next().unwrap_or(key);
                file_name.contains(pattern).then(|| StoredFile {
                    path: key.to_string(),
                    modified: object.last_modified().map_or(0, |at| at.secs()),
                })
            }));

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }
        log::trace!(target: "destinations::object_storage", "Listed {} objects in {} for {pattern}", files.len(), self.bucket);

        Ok(newest_first(files))
    }

    fn delete_file(&self, path: &str) {
        let result = self.runtime.block_on(
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(path)
                .send(),
        );

        match result {
            Ok(_) => log::info!(target: "destinations::object_storage", "Deleted {}/{path}", self.bucket),
            Err(e) => {
                log::warn!(target: "destinations::object_storage", "Failed to delete {}/{path}: {e}", self.bucket)
            }
        }
    }

    fn full_path(&self, file_name: &str, dest_sub_path: Option<&str>) -> String {
        object_key(file_name, dest_sub_path)
    }

    fn store(&self, local_path: &Path, target: &str) -> Result<(), DestinationError> {
        self.runtime.block_on(async {
            // streams the file instead of reading it into memory
            let body = ByteStream::from_path(local_path).await.map_err(|e| {
                DestinationError::ObjectStorage(format!("Failed to open {}: {e}", local_path.display()))
            })?;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(target)
                .body(body)
                .send()
                .await
                .map_err(|e| DestinationError::ObjectStorage(format!("Failed to put object: {e}")))?;

            Ok::<_, DestinationError>(())
        })?;
        log::info!(target: "destinations::object_storage", "Stored {}/{target}", self.bucket);

        Ok(())
    }
}

fn object_key(file_name: &str, dest_sub_path: Option<&str>) -> String {
    match dest_sub_path
        .map(|sub| sub.trim_matches('/'))
        .filter(|sub| !sub.is_empty())
    {
        Some(sub) => format!("{sub}/{file_name}"),
        None => file_name.to_string(),
    }
}
