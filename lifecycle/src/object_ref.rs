use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identifies a single cluster object by type, namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    /// `None` for cluster scoped objects.
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new<S1, S2, S3>(api_version: S1, kind: S2, namespace: Option<&str>, name: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Create a reference to an object of the statically known type `K`.
    pub fn of<K, S>(namespace: Option<&str>, name: S) -> Self
    where
        K: kube::Resource<DynamicType = ()>,
        S: Into<String>,
    {
        Self::new(K::api_version(&()), K::kind(&()), namespace, name)
    }

    /// Build a reference from a dynamic object. Returns `None` if the object is missing its type
    /// information or its name.
    pub fn from_object(object: &DynamicObject) -> Option<Self> {
        let types = object.types.as_ref()?;
        let name = object.metadata.name.as_ref()?;
        Some(Self {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            namespace: object.namespace(),
            name: name.clone(),
        })
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = split_api_version(&self.api_version);
        GroupVersionKind::gvk(group, version, &self.kind)
    }

    /// The `ApiResource` used to address this object through a dynamic `kube::Api`.
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{} {}/{}", self.kind, namespace, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Splits `apps/v1` into `("apps", "v1")` and the core group's `v1` into `("", "v1")`.
pub(crate) fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Namespace;

    #[test]
    fn display() {
        let deployment = ObjectRef::of::<Deployment, _>(Some("operators"), "odh-operator");
        assert_eq!(deployment.to_string(), "Deployment operators/odh-operator");
        let namespace = ObjectRef::of::<Namespace, _>(None, "test-codeflare");
        assert_eq!(namespace.to_string(), "Namespace test-codeflare");
    }

    #[test]
    fn api_versions() {
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(split_api_version("v1"), ("", "v1"));
        let plan = ObjectRef::new(
            "operators.coreos.com/v1alpha1",
            "InstallPlan",
            Some("openshift-operators"),
            "install-abcde",
        );
        let resource = plan.api_resource();
        assert_eq!(resource.group, "operators.coreos.com");
        assert_eq!(resource.plural, "installplans");
    }

    #[test]
    fn from_object_requires_types() {
        let resource = ApiResource::erase::<Namespace>(&());
        let object = DynamicObject::new("upgrade-dsc", &resource);
        let reference = ObjectRef::from_object(&object).unwrap();
        assert_eq!(reference, ObjectRef::of::<Namespace, _>(None, "upgrade-dsc"));

        let mut untyped = object;
        untyped.types = None;
        assert!(ObjectRef::from_object(&untyped).is_none());
    }
}
