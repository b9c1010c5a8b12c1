use async_trait::async_trait;

use super::{Assembler, Package, PackagerOptions};
use crate::{error::Result, snapshot::DepositSubmission};

/// Packages the snapshot as a single JSON manifest listing metadata and file
/// locations.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonManifestAssembler;

#[async_trait]
impl Assembler for JsonManifestAssembler {
    async fn assemble(
        &self,
        snapshot: &DepositSubmission,
        options: &PackagerOptions,
    ) -> Result<Package> {
        let bytes = if options.get("pretty").is_some_and(|v| v == "true") {
            serde_json::to_vec_pretty(snapshot)?
        } else {
            serde_json::to_vec(snapshot)?
        };
        Ok(Package {
            name: format!("{}.json", snapshot.submission),
            content_type: "application/json".to_string(),
            bytes,
        })
    }
}
