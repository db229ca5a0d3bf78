use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::naming::ResourceNames;

/// A builder to build [`ObjectMeta`] objects.
///
/// Top-level resources should start from [`Self::for_proxy`], which applies the shared name, namespace and
/// owner labels.
#[derive(Clone, Debug, Default)]
pub struct ObjectMetaBuilder {
    name: Option<String>,
    namespace: Option<String>,
    labels: Option<BTreeMap<String, String>>,
    annotations: Option<BTreeMap<String, String>>,
}

impl ObjectMetaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name, namespace and owner labels of every resource belonging to the proxy described by `names`.
    pub fn for_proxy(names: &ResourceNames) -> Self {
        Self {
            name: Some(names.name().to_owned()),
            namespace: Some(names.namespace().to_owned()),
            labels: Some(names.labels().clone()),
            annotations: None,
        }
    }

    /// This will replace all existing labels
    pub fn labels(&mut self, labels: BTreeMap<String, String>) -> &mut Self {
        self.labels = Some(labels);
        self
    }

    /// This adds multiple annotations to the existing annotations.
    /// Any existing annotation with a key that is contained in `annotations` will be overwritten
    pub fn with_annotations<'a>(
        &mut self,
        annotations: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> &mut Self {
        self.annotations.get_or_insert_with(BTreeMap::new).extend(
            annotations
                .into_iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        self
    }

    /// Empty label and annotation maps are left out of the result.
    pub fn build(&self) -> ObjectMeta {
        ObjectMeta {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            labels: self.labels.clone().filter(|labels| !labels.is_empty()),
            annotations: self
                .annotations
                .clone()
                .filter(|annotations| !annotations.is_empty()),
            ..ObjectMeta::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProxyIdentity;

    #[test]
    fn objectmeta_builder() {
        let meta = ObjectMetaBuilder::new()
            .labels(BTreeMap::from([("app".to_owned(), "envoy".to_owned())]))
            .with_annotations(&BTreeMap::from([("foo".to_owned(), "bar".to_owned())]))
            .with_annotations(&BTreeMap::from([
                ("foo".to_owned(), "baz".to_owned()),
                ("other".to_owned(), "value".to_owned()),
            ]))
            .build();

        assert_eq!(meta.name, None);
        assert_eq!(meta.namespace, None);
        assert_eq!(
            meta.labels,
            Some(BTreeMap::from([("app".to_owned(), "envoy".to_owned())]))
        );
        assert_eq!(
            meta.annotations,
            Some(BTreeMap::from([
                ("foo".to_owned(), "baz".to_owned()),
                ("other".to_owned(), "value".to_owned()),
            ]))
        );
    }

    #[test]
    fn objectmeta_for_proxy() {
        let names = ResourceNames::new(&ProxyIdentity::for_gateway(
            "default/eg",
            "envoy-gateway-system",
            "default",
            "eg",
        ))
        .expect("identity is valid");
        let meta = ObjectMetaBuilder::for_proxy(&names)
            .with_annotations(&BTreeMap::new())
            .build();

        assert_eq!(meta.name.as_deref(), Some(names.name()));
        assert_eq!(meta.labels.as_ref(), Some(names.labels()));
        assert_eq!(meta.annotations, None);
    }
}
