//! CRD manifests and installation

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use concord_common::backoff::{retry_with_backoff, BackoffConfig};
use concord_common::crd::{JWTAuthenticator, OIDCProvider, WebhookAuthenticator};
use concord_common::FIELD_MANAGER;

/// Attempts made to install each CRD before startup fails
const CRD_INSTALL_ATTEMPTS: u32 = 5;

/// Every CRD the broker serves or watches
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        OIDCProvider::crd(),
        WebhookAuthenticator::crd(),
        JWTAuthenticator::crd(),
    ]
}

/// All CRDs as a multi-document YAML stream
pub fn render_crds_yaml() -> Result<String, serde_yaml::Error> {
    let documents = all_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(documents.join("---\n"))
}

/// Install or update all CRDs with server-side apply
pub async fn ensure_crds_installed(client: &Client) -> Result<(), kube::Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let backoff = BackoffConfig::with_max_attempts(CRD_INSTALL_ATTEMPTS);

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let patch = Patch::Apply(&crd);
        tracing::info!(crd = %name, "Installing CRD");
        retry_with_backoff(&backoff, &format!("install CRD {}", name), || {
            crds.patch(&name, &params, &patch)
        })
        .await?;
    }

    tracing::info!("All Concord CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_names_follow_group_conventions() {
        let names: Vec<String> = all_crds()
            .into_iter()
            .filter_map(|crd| crd.metadata.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "oidcproviders.config.supervisor.concord.dev",
                "webhookauthenticators.authentication.concierge.concord.dev",
                "jwtauthenticators.authentication.concierge.concord.dev",
            ]
        );
    }

    #[test]
    fn yaml_stream_contains_every_kind() {
        let yaml = render_crds_yaml().unwrap();
        assert_eq!(yaml.matches("kind: CustomResourceDefinition").count(), 3);
        assert!(yaml.contains("kind: OIDCProvider"));
        assert!(yaml.contains("kind: WebhookAuthenticator"));
        assert!(yaml.contains("kind: JWTAuthenticator"));

        let documents: Vec<&str> = yaml.split("---\n").collect();
        assert_eq!(documents.len(), 3);
        for doc in documents {
            let crd: CustomResourceDefinition = serde_yaml::from_str(doc).unwrap();
            assert_eq!(crd.spec.versions[0].name, "v1alpha1");
        }
    }

    #[test]
    fn authenticators_are_cluster_scoped() {
        assert_eq!(WebhookAuthenticator::crd().spec.scope, "Cluster");
        assert_eq!(JWTAuthenticator::crd().spec.scope, "Cluster");
        assert_eq!(OIDCProvider::crd().spec.scope, "Namespaced");
    }
}
