use k8s_openapi::api::core::v1::ServiceAccount;
use tracing::instrument;

use super::ResourceRender;
use crate::builder::meta::ObjectMetaBuilder;

impl ResourceRender<'_> {
    #[instrument(skip_all, fields(proxy = self.names.name()))]
    pub fn service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMetaBuilder::for_proxy(&self.names).build(),
            ..ServiceAccount::default()
        }
    }
}
