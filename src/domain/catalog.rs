//! Known OpenShift host units: what their logs look like when something is
//! wrong, and which units they need running alongside them.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use regex::Captures;

use crate::domain::dependencies::DependencyRule;
use crate::domain::rules::{Interpret, LogMatcher, ScanContext, UnitSpec};
use crate::errors::DiagError;
use crate::journal::LogEntry;
use crate::sink::{Level, Msg};

#[derive(Debug, Clone)]
pub struct Catalog {
    pub units: Vec<UnitSpec>,
    pub dependencies: Vec<DependencyRule>,
}

impl Catalog {
    pub fn build() -> Result<Self, DiagError> {
        Ok(Self {
            units: unit_log_specs()?,
            dependencies: DEPENDENCIES.to_vec(),
        })
    }

    /// Every unit name the catalog has an opinion about, sorted and unique.
    pub fn known_units(&self) -> Vec<&'static str> {
        let mut names = self
            .units
            .iter()
            .map(|unit| unit.name)
            .chain(
                self.dependencies
                    .iter()
                    .flat_map(|rule| [rule.dependent, rule.required]),
            )
            .collect::<Vec<_>>();
        names.sort_unstable();
        names.dedup();
        names
    }
}

const BAD_IMAGE_TEMPLATE: &str = "
This error indicates openshift was given the flag --images including an invalid format variable.
Valid formats can include (literally) ${component} and ${version}.
This could be a typo or you might be intending to hardcode something,
such as a version which should be specified as e.g. v3.0, not ${v3.0}.
Note that the --images flag may be supplied via the OpenShift master,
node, or \"openshift ex registry/router\" invocations and should usually
be the same for each.";

fn bad_image_template() -> Result<LogMatcher, DiagError> {
    LogMatcher::once(
        r"Unable to find an image for .* due to an error processing the format: %!v\(MISSING\)",
        Level::Info,
        "sdLogBadImgTmpl",
        BAD_IMAGE_TEMPLATE,
    )
}

fn unit_log_specs() -> Result<Vec<UnitSpec>, DiagError> {
    let bad_image_template = bad_image_template()?;

    Ok(vec![
        UnitSpec::new(
            "openshift-master",
            "Starting an OpenShift master",
            vec![
                bad_image_template.clone(),
                LogMatcher::once(
                    "Unable to decode an event from the watch stream: local error: unexpected message",
                    Level::Info,
                    "sdLogOMIgnore",
                    "You can safely ignore this message.",
                )?,
                LogMatcher::once(
                    r"HTTP probe error: Get .*/healthz: dial tcp .*:10250: connection refused",
                    Level::Info,
                    "sdLogOMhzRef",
                    "
The OpenShift master does a health check on nodes that are defined in
its records, and this is the result when the node is not available yet.
Since the master records are typically created before the node is
available, this is not usually a problem, unless it continues in the
logs after the node is actually available.",
                )?,
                // TODO: match IPv6 client addresses as well
                LogMatcher::custom(
                    r"http: TLS handshake error from ([\d.]+):\d+: remote error: bad certificate",
                    BAD_CERT_ID,
                    Rc::new(BadCertificateInterpreter::default()),
                )?,
                LogMatcher::once(
                    r"system:anonymous\W*system:unauthenticated\W*/api/v1beta1/services\?namespace=",
                    Level::Warn,
                    "sdLogOMunauthNode",
                    "
This indicates the OpenShift API server (master) received an unscoped
request to get Services. Requests like this probably come from an
OpenShift node trying to discover where it should proxy services.

However, the request was unauthenticated, so it was denied. The node
either did not offer a client certificate for credential, or offered an
invalid one (not signed by the certificate authority the master uses).
The node will not be able to function without this access.

Unfortunately, this message does not tell us *which* node is the
problem. But running diagnostics on your node hosts should find a log
message for any node with this problem.
",
                )?,
            ],
        )?,
        UnitSpec::new("openshift-sdn-master", "Starting OpenShift SDN Master", vec![])?,
        UnitSpec::new(
            "openshift-node",
            "Starting an OpenShift node",
            vec![
                bad_image_template,
                LogMatcher::once(
                    r"Unable to load services: Get (http\S+/api/v1beta1/services\?namespace=): (.+)",
                    Level::Error,
                    "sdLogONconnMaster",
                    "
openshift-node could not connect to the OpenShift master API in order
to determine its responsibilities. This host will not function as a node
until this is resolved. Pods scheduled for this node will remain in
pending or unknown state forever.",
                )?,
                LogMatcher::once(
                    r#"Unable to load services: request.*403 Forbidden: Forbidden: "/api/v1beta1/services\?namespace=" denied by default"#,
                    Level::Error,
                    "sdLogONMasterForbids",
                    "
openshift-node could not connect to the OpenShift master API to determine
its responsibilities because it lacks the proper credentials. Nodes
should specify a client certificate in order to identify themselves to
the master. This message typically means that either no client key/cert
was supplied, or it is not validated by the certificate authority (CA)
the master uses. You should supply a correct client key and certificate
to the .kubeconfig specified in /etc/sysconfig/openshift-node

This host will not function as a node until this is resolved. Pods
scheduled for this node will remain in pending or unknown state forever.",
                )?,
            ],
        )?,
        UnitSpec::new(
            "openshift-sdn-node",
            "Starting OpenShift SDN node",
            vec![LogMatcher::once(
                r"Could not find an allocated subnet for this minion.*Waiting\.\.",
                Level::Warn,
                "sdLogOSNnoSubnet",
                "
This warning occurs when openshift-sdn-node is trying to request the
SDN subnet it should be configured with according to openshift-sdn-master,
but either can't connect to it (\"All the given peers are not reachable\")
or has not yet been assigned a subnet (\"Key not found\").

This can just be a matter of waiting for the master to become fully
available and define a record for the node (aka \"minion\") to use,
and openshift-sdn-node will wait until that occurs, so the presence
of this message in the node log isn't necessarily a problem as
long as the SDN is actually working, but this message may help indicate
the problem if it is not working.

If the master is available and this node's record is defined and this
message persists, then it may be a sign of a different misconfiguration.
Unfortunately the message is not specific about why the connection failed.
Check MASTER_URL in /etc/sysconfig/openshift-sdn-node:
 * Is the protocol https? It should be http.
 * Can you reach the address and port from the node using curl?
   (\"404 page not found\" is correct response)",
            )?],
        )?,
        UnitSpec::new(
            "docker",
            r"Starting Docker Application Container Engine\.",
            vec![
                LogMatcher::once(
                    r"Usage: docker \[OPTIONS\] COMMAND",
                    Level::Error,
                    "sdLogDbadOpt",
                    "
This indicates that docker failed to parse its command line
successfully, so it just printed a standard usage message and exited.
Its command line is built from variables in /etc/sysconfig/docker
(which may be overridden by variables in /etc/sysconfig/openshift-sdn-node)
so check there for problems.

The OpenShift node will not work on this host until this is resolved.",
                )?,
                // generic; keep last
                LogMatcher::once(
                    r#"(^|\s)level="fatal"\s"#,
                    Level::Error,
                    "sdLogDfatal",
                    "
This is not a known problem, but it is causing Docker to crash,
so the OpenShift node will not work on this host until it is resolved.",
                )?,
            ],
        )?,
        UnitSpec::new("openvswitch", "Starting Open vSwitch", vec![])?,
    ])
}

const BAD_CERT_ID: &str = "sdLogOMreBadCert";

const BAD_CERT_EXPLANATION: &str = "
This error indicates that a client attempted to connect to the master
HTTPS API server but broke off the connection because the master's
certificate is not validated by a certificate authority (CA) acceptable
to the client. There are a number of ways this can occur, some more
problematic than others.

At this time, the OpenShift master certificate is signed by a private CA
(created the first time the master runs) and clients should have a copy of
that CA certificate in order to validate connections to the master. Most
likely, either:
1. the master has generated a new CA (after the administrator deleted
   the old one) and the client has a copy of the old CA cert, or
2. the client hasn't been configured with a private CA at all (or the
   wrong one), or
3. the client is attempting to reach the master at a URL that isn't
   covered by the master's server certificate, e.g. a public-facing
   name or IP that isn't known to the master automatically; this may
   need to be specified with the --public-master flag on the master
   in order to generate a new server certificate including it.

Clients of the master may include users, nodes, and infrastructure
components running as containers. Check the \"from\" IP address in the
log message:
* If it is from a SDN IP, it is likely from an infrastructure
  component. Check pod logs and recreate it with the correct CA cert.
  Routers and registries won't work properly with the wrong CA.
* If it is from a node IP, the client is likely a node. Check the
  openshift-node and openshift-sdn-node logs and reconfigure with the
  correct CA cert. Nodes will be unable to create pods until this is
  corrected.
* If it is from an external IP, it is likely from a user (CLI, browser,
  etc.). osc and openshift clients should be configured with the correct
  CA cert; browsers can also add CA certs but it is usually easier
  to just have them accept the server certificate on the first visit
  (so this message may simply indicate that the master generated a new
  server certificate, e.g. to add a different --public-master, and a
  browser hasn't accepted it yet and is still attempting API calls;
  try logging out of the console and back in again).";

/// Explains a bad-certificate handshake failure in full the first time, then
/// once more per new client address. Client addresses are remembered for the
/// lifetime of the catalog, across units.
#[derive(Debug, Default)]
pub struct BadCertificateInterpreter {
    seen_clients: RefCell<Option<HashSet<String>>>,
}

impl Interpret for BadCertificateInterpreter {
    fn interpret(
        &self,
        ctx: &mut ScanContext<'_>,
        entry: &LogEntry,
        captures: &Captures<'_>,
    ) -> bool {
        let client = captures.get(1).map_or("", |m| m.as_str());
        let prelude = "Found '{{unit}}' journald log message:\n  {{logMsg}}\n";

        let mut seen = self.seen_clients.borrow_mut();
        let clients = seen.get_or_insert_with(HashSet::new);
        let text = if !clients.insert(client.to_string()) {
            None
        } else if clients.len() == 1 {
            Some(BAD_CERT_EXPLANATION)
        } else {
            Some("This message was diagnosed above, but for a different client address.")
        };

        if let Some(text) = text {
            ctx.sink.warn(
                BAD_CERT_ID,
                Msg::new(format!("{prelude}{text}"))
                    .with("unit", ctx.unit)
                    .with("client", client)
                    .with("logMsg", entry.message.as_str()),
            );
        }
        true
    }
}

const NODE_NEEDS_IPTABLES: &str = "
iptables is used by OpenShift nodes for container networking.
Connections to a container will fail without it.";
const NODE_NEEDS_DOCKER: &str = "OpenShift nodes use Docker to run containers.";
const SDN_CONNECTS_NODES: &str = "
The software-defined network (SDN) enables networking between
containers on different nodes. If it is not running, containers
on different nodes will not be able to connect to each other.";

const DEPENDENCIES: [DependencyRule; 8] = [
    DependencyRule {
        dependent: "openshift-node",
        required: "iptables",
        rationale: NODE_NEEDS_IPTABLES,
    },
    DependencyRule {
        dependent: "openshift-node",
        required: "docker",
        rationale: NODE_NEEDS_DOCKER,
    },
    DependencyRule {
        dependent: "openshift-node",
        required: "openshift-sdn-node",
        rationale: SDN_CONNECTS_NODES,
    },
    DependencyRule {
        dependent: "openshift-sdn-master",
        required: "openshift-master",
        rationale: "
The software-defined network (SDN) enables networking between containers
on different nodes, coordinated via openshift-sdn-master. It does not
make sense to run this service unless the host is operating as an
OpenShift master.",
    },
    DependencyRule {
        dependent: "openshift-master",
        required: "openshift-sdn-master",
        rationale: "
The software-defined network (SDN) enables networking between
containers on different nodes. If it is not running, containers
on different nodes will not be able to connect to each other.
openshift-sdn-master is required to provision the SDN subnets.",
    },
    DependencyRule {
        dependent: "openshift-sdn-node",
        required: "openvswitch",
        rationale: "
The software-defined network (SDN) enables networking between
containers on different nodes. Containers will not be able to
connect to each other without the openvswitch service carrying
this traffic.",
    },
    DependencyRule {
        dependent: "openshift",
        required: "docker",
        rationale: NODE_NEEDS_DOCKER,
    },
    DependencyRule {
        dependent: "openshift",
        required: "iptables",
        rationale: NODE_NEEDS_IPTABLES,
    },
];

#[cfg(test)]
mod tests {
    use super::Catalog;
    use crate::domain::rules::Interpretation;
    use crate::domain::scanner::match_logs_since_last_start;
    use crate::domain::scanner::tests::ScriptedSource;
    use crate::report::Report;
    use crate::sink::Level;

    fn unit<'a>(catalog: &'a Catalog, name: &str) -> &'a crate::domain::rules::UnitSpec {
        catalog
            .units
            .iter()
            .find(|unit| unit.name == name)
            .expect("unit in catalog")
    }

    #[test]
    fn catalog_builds_and_lists_known_units() {
        let catalog = Catalog::build().expect("catalog patterns compile");
        assert_eq!(
            catalog.known_units(),
            vec![
                "docker",
                "iptables",
                "openshift",
                "openshift-master",
                "openshift-node",
                "openshift-sdn-master",
                "openshift-sdn-node",
                "openvswitch",
            ]
        );
    }

    #[test]
    fn generic_docker_rule_is_last() {
        let catalog = Catalog::build().expect("catalog");
        let last = unit(&catalog, "docker").matchers.last().expect("matchers");
        assert!(matches!(
            last.interpretation,
            Interpretation::Static { id: "sdLogDfatal", .. }
        ));
    }

    #[test]
    fn docker_fatal_then_start_boundary() {
        let catalog = Catalog::build().expect("catalog");
        let source = ScriptedSource::default().with_messages(
            "docker",
            &[
                r#"level="fatal" msg="Error starting daemon""#,
                "Starting Docker Application Container Engine.",
                r#"level="fatal" msg="older crash""#,
            ],
        );
        let mut report = Report::new();

        match_logs_since_last_start(&source, unit(&catalog, "docker"), &mut report);

        assert_eq!(report.ids(), vec!["sdLogDfatal"]);
        assert_eq!(report.findings()[0].level, Level::Error);
        assert_eq!(source.consumed("docker"), 2);
    }

    #[test]
    fn bad_certificate_reported_per_new_client() {
        let catalog = Catalog::build().expect("catalog");
        let line = |ip: &str| {
            format!("http: TLS handshake error from {ip}:52114: remote error: bad certificate")
        };
        let lines = [line("10.0.0.5"), line("10.0.0.6"), line("10.0.0.5")];
        let lines = lines.iter().map(String::as_str).collect::<Vec<_>>();
        let source = ScriptedSource::default().with_messages("openshift-master", &lines);
        let mut report = Report::new();

        let summary =
            match_logs_since_last_start(&source, unit(&catalog, "openshift-master"), &mut report);

        assert_eq!(report.ids(), vec!["sdLogOMreBadCert", "sdLogOMreBadCert"]);
        assert!(report.findings().iter().all(|f| f.level == Level::Warn));
        assert_eq!(report.findings()[0].fields["client"], "10.0.0.5");
        assert!(report.findings()[0].text.contains("private CA"));
        assert_eq!(report.findings()[1].fields["client"], "10.0.0.6");
        assert!(report.findings()[1]
            .text
            .ends_with("This message was diagnosed above, but for a different client address."));
        assert_eq!(summary.matches, 3);
        assert_eq!(source.consumed("openshift-master"), 3);
        assert_eq!(report.duplicates_suppressed(), 0);
    }

    #[test]
    fn seen_clients_persist_across_scans() {
        let catalog = Catalog::build().expect("catalog");
        let master = unit(&catalog, "openshift-master");
        let source = ScriptedSource::default().with_messages(
            "openshift-master",
            &["http: TLS handshake error from 10.1.1.1:443: remote error: bad certificate"],
        );
        let mut report = Report::new();

        match_logs_since_last_start(&source, master, &mut report);
        match_logs_since_last_start(&source, master, &mut report);

        assert_eq!(report.findings().len(), 1);
        assert_eq!(report.duplicates_suppressed(), 0);
    }

    #[test]
    fn shared_image_rule_retires_independently_per_unit() {
        let catalog = Catalog::build().expect("catalog");
        let message = "Unable to find an image for openshift/origin-${component} due to an error processing the format: %!v(MISSING)";
        let source = ScriptedSource::default()
            .with_messages("openshift-master", &[message, message])
            .with_messages("openshift-node", &[message]);
        let mut report = Report::new();

        match_logs_since_last_start(&source, unit(&catalog, "openshift-master"), &mut report);
        match_logs_since_last_start(&source, unit(&catalog, "openshift-node"), &mut report);

        let units = report
            .findings()
            .iter()
            .map(|finding| finding.fields["unit"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(units, vec!["openshift-master", "openshift-node"]);
        assert!(report.ids().iter().all(|id| *id == "sdLogBadImgTmpl"));
    }
}
