//! Instance discovery from pods

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::Serialize;

use crate::pki::CertificateSubject;

/// One running member of an intent
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Instance {
    /// Pod name
    pub name: String,
    /// Pod IP
    pub address: String,
    /// Node IP, when known
    pub host_address: Option<String>,
    /// Stable identity: the pod ordinal, or the full name without one
    pub identity: String,
}

impl Instance {
    /// Certificate subject for this instance
    ///
    /// Under host networking the host address is an alternate identity, as
    /// is the cluster IP of the service fronting the instances.
    pub fn certificate_subject(
        &self,
        host_network: bool,
        service_address: Option<&str>,
    ) -> CertificateSubject {
        let mut subject = CertificateSubject::new(&self.name, &self.address);
        if let (Some(host), true) = (&self.host_address, host_network) {
            subject = subject.with_alternate(host);
        }
        if let Some(service) = service_address {
            subject = subject.with_alternate(service);
        }
        subject
    }
}

/// Stable identity of a pod: the ordinal after the last `-`, else the name
pub fn identity_of(pod_name: &str) -> String {
    match pod_name.rsplit_once('-') {
        Some((_, ordinal)) if !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit()) => {
            ordinal.to_string()
        }
        _ => pod_name.to_string(),
    }
}

/// Instances from a pod listing, sorted by address
///
/// Pods without an address have not been scheduled yet and are skipped.
pub fn instances_from_pods(pods: &[Pod]) -> Vec<Instance> {
    let mut instances: Vec<Instance> = pods
        .iter()
        .filter_map(|pod| {
            let status = pod.status.as_ref()?;
            let address = status.pod_ip.clone().filter(|ip| !ip.is_empty())?;
            let name = pod.name_any();
            Some(Instance {
                identity: identity_of(&name),
                host_address: status.host_ip.clone().filter(|ip| !ip.is_empty()),
                name,
                address,
            })
        })
        .collect();
    instances.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));
    instances
}

#[cfg(test)]
pub(crate) fn pod(name: &str, ip: Option<&str>) -> Pod {
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            pod_ip: ip.map(str::to_string),
            host_ip: ip.map(|_| "192.168.0.1".to_string()),
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}
