//! Uploads reports to S3, optionally gzip-compressed.

use anyhow::Result;
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use tracing::info;

use crate::hierarchy::EntityId;
use crate::submission::ItineraryId;

/// Object key for a report: `reports/itinerary=<id>/scope=<entity>.json[.gz]`.
pub fn report_key(itinerary: &ItineraryId, scope: &EntityId, gzip: bool) -> String {
    let key = format!("reports/itinerary={}/scope={}.json", itinerary, scope);
    if gzip { format!("{}.gz", key) } else { key }
}

pub fn gzip_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Serializes a value to JSON and uploads it with `application/json` content
/// type. With `gzip` the body is compressed and marked with a gzip encoding.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
    gzip: bool,
) -> Result<()> {
    let json = serde_json::to_vec(value)?;
    let body = if gzip { gzip_bytes(&json)? } else { json };
    let size = body.len();

    let mut request = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type("application/json");
    if gzip {
        request = request.content_encoding("gzip");
    }
    request.send().await?;

    info!(bucket, key, bytes = size, gzip, "Report uploaded to S3");
    Ok(())
}
