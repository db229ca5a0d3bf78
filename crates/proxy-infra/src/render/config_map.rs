use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use tracing::instrument;

use super::ResourceRender;
use crate::{
    bootstrap::{
        BOOTSTRAP_FILE_NAME, XDS_CERTIFICATE_FILE_NAME, XDS_TRUSTED_CA_FILE_NAME, xds_certificate,
        xds_trusted_ca,
    },
    builder::meta::ObjectMetaBuilder,
};

impl ResourceRender<'_> {
    /// The ConfigMap holding the bootstrap configuration and the SDS files it references.
    ///
    /// A literal bootstrap is stored verbatim.
    #[instrument(skip_all, fields(proxy = self.names.name()))]
    pub fn config_map(&self) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMetaBuilder::for_proxy(&self.names).build(),
            data: Some(BTreeMap::from([
                (
                    BOOTSTRAP_FILE_NAME.to_owned(),
                    self.settings.proxy.bootstrap.clone(),
                ),
                (XDS_TRUSTED_CA_FILE_NAME.to_owned(), xds_trusted_ca()),
                (XDS_CERTIFICATE_FILE_NAME.to_owned(), xds_certificate()),
            ])),
            ..ConfigMap::default()
        }
    }
}
