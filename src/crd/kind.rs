//! Service kind discriminator

use std::fmt;

/// The service kinds managed by the operator
///
/// Used wherever code needs to name a kind without holding a typed object:
/// labels, object names, status patches and dependency references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceKind {
    /// Database tier
    Cassandra,
    /// Coordination service
    Zookeeper,
    /// Message broker
    Rabbitmq,
    /// API/config tier
    Config,
    /// Topology/analytics tier
    AnalyticsSnmp,
    /// Web console
    Webui,
    /// Per-node data-plane agent
    Vrouter,
    /// Bridge between the Kubernetes API and the fabric
    Kubemanager,
}

impl ServiceKind {
    /// Every kind, in dependency order
    pub const ALL: [ServiceKind; 8] = [
        Self::Cassandra,
        Self::Zookeeper,
        Self::Rabbitmq,
        Self::Config,
        Self::AnalyticsSnmp,
        Self::Webui,
        Self::Vrouter,
        Self::Kubemanager,
    ];

    /// Lower-case token used in labels and derived object names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cassandra => "cassandra",
            Self::Zookeeper => "zookeeper",
            Self::Rabbitmq => "rabbitmq",
            Self::Config => "config",
            Self::AnalyticsSnmp => "analyticssnmp",
            Self::Webui => "webui",
            Self::Vrouter => "vrouter",
            Self::Kubemanager => "kubemanager",
        }
    }

    /// CRD kind name
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Cassandra => "Cassandra",
            Self::Zookeeper => "Zookeeper",
            Self::Rabbitmq => "Rabbitmq",
            Self::Config => "Config",
            Self::AnalyticsSnmp => "AnalyticsSnmp",
            Self::Webui => "Webui",
            Self::Vrouter => "Vrouter",
            Self::Kubemanager => "Kubemanager",
        }
    }

    /// Whether other kinds can depend on this one
    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            Self::Cassandra | Self::Zookeeper | Self::Rabbitmq | Self::Config
        )
    }

    /// Name of the configuration map owned by an instance of this kind
    pub fn config_map_name(&self, instance: &str) -> String {
        format!("{instance}-{}-configmap", self.as_str())
    }

    /// Label selector matching pods of one instance of this kind
    pub fn pod_selector(&self, instance: &str) -> String {
        format!(
            "{}={},{}={}",
            LABEL_KIND,
            self.as_str(),
            LABEL_INSTANCE,
            instance
        )
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// Label carrying the service kind on every derived object
pub const LABEL_KIND: &str = "fabric.dev/kind";
/// Label carrying the owning instance name on every derived object
pub const LABEL_INSTANCE: &str = "fabric.dev/instance";
/// Pod label set once the pod's configuration is stored; the init gate waits on it
pub const LABEL_CONFIG_READY: &str = "fabric.dev/config-ready";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names_follow_instance_kind_convention() {
        assert_eq!(
            ServiceKind::Config.config_map_name("config1"),
            "config1-config-configmap"
        );
        assert_eq!(
            ServiceKind::AnalyticsSnmp.pod_selector("snmp1"),
            "fabric.dev/kind=analyticssnmp,fabric.dev/instance=snmp1"
        );
    }

    #[test]
    fn only_backing_tiers_are_providers() {
        let providers: Vec<_> = ServiceKind::ALL
            .iter()
            .filter(|k| k.is_provider())
            .collect();
        assert_eq!(providers.len(), 4);
        assert!(!ServiceKind::Webui.is_provider());
        assert!(!ServiceKind::Vrouter.is_provider());
        assert!(!ServiceKind::Kubemanager.is_provider());
    }

    #[test]
    fn display_uses_crd_kind_name() {
        assert_eq!(ServiceKind::AnalyticsSnmp.to_string(), "AnalyticsSnmp");
    }
}
