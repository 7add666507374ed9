//! CRD installation using server-side apply
//!
//! The operator installs its own CRDs on startup so the installed schema
//! always matches the operator version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use kubetrain_common::crd::TrainingJob;

/// Field manager for CRD applies
const CRD_FIELD_MANAGER: &str = "kubetrain-controller";

/// CRD definition with name and resource
struct CrdDef {
    name: String,
    crd: CustomResourceDefinition,
}

fn operator_crds() -> Vec<CrdDef> {
    vec![CrdDef {
        name: TrainingJob::crd_name().to_string(),
        crd: TrainingJob::crd(),
    }]
}

/// Install the operator's CRDs
pub async fn ensure_crds(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CRD_FIELD_MANAGER).force();

    for def in operator_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(&def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("kubetrain CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_names_match_definitions() {
        for def in operator_crds() {
            assert_eq!(def.crd.metadata.name.as_deref(), Some(def.name.as_str()));
        }
        assert_eq!(operator_crds()[0].name, "trainingjobs.kubetrain.dev");
    }
}
