//! Stemcell methods. Images are uploaded out of band, so creation only
//! checks that the referenced image template exists.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

use crate::application::ports::CloudApi;
use crate::application::services::vm::find_stemcell;
use crate::commands::args::{Args, CommandError, numeric_id};

#[derive(Debug, Default, Deserialize)]
struct StemcellProperties {
    #[serde(rename = "virtual-disk-image-id")]
    image_id: Option<Value>,
}

/// `[image_path, cloud_properties]`
pub async fn create_stemcell(cloud: &impl CloudApi, args: &Args<'_>) -> Result<Value> {
    let props: StemcellProperties = args.required(1, "cloud_properties")?;
    let id = props
        .image_id
        .as_ref()
        .and_then(numeric_id)
        .ok_or_else(|| CommandError::BadArgument {
            method: "create_stemcell".to_string(),
            index: 1,
            name: "cloud_properties",
            reason: "lacks a numeric virtual-disk-image-id".to_string(),
        })?;
    let stemcell = find_stemcell(cloud, id).await?;
    tracing::info!(
        stemcell_id = stemcell.id,
        uuid = %stemcell.global_identifier,
        "stemcell verified"
    );
    Ok(Value::String(stemcell.id.to_string()))
}

pub fn delete_stemcell(args: &Args<'_>) -> Result<Value> {
    let id = args.id(0, "stemcell_id")?;
    tracing::info!(
        stemcell_id = id,
        "stemcell images are managed outside the CPI; nothing deleted"
    );
    Ok(Value::Null)
}
