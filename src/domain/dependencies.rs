//! Unit-to-unit requirement checks against a [`UnitSnapshot`]

use crate::systemd_client::{UnitSnapshot, UnitState};
use crate::sink::{LogSink, Msg};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyRule {
    pub dependent: &'static str,
    pub required: &'static str,
    pub rationale: &'static str,
}

/// Reports the most severe problem with `dependent` requiring `required`, if any.
pub fn unit_requires_unit(
    sink: &mut dyn LogSink,
    dependent: &UnitState,
    required: &UnitState,
    rationale: &str,
) {
    let msg = |template: &str| {
        Msg::new(template)
            .with("unit", dependent.name.as_str())
            .with("required", required.name.as_str())
            .with("reason", rationale)
    };

    if (dependent.active || dependent.enabled) && !required.exists {
        sink.error(
            "sdUnitReqLoaded",
            msg("
systemd unit {{unit}} depends on unit {{required}}, which is not loaded.
{{reason}}
An administrator probably needs to install the {{required}} unit with:

  # yum install {{required}}

If it is already installed, you may need to reload the definition with:

  # systemctl reload {{required}}
  "),
        );
    } else if dependent.active && !required.active {
        sink.error(
            "sdUnitReqActive",
            msg("
systemd unit {{unit}} is running but {{required}} is not.
{{reason}}
An administrator can start the {{required}} unit with:

  # systemctl start {{required}}

To ensure it is not failing to run, check the status and logs with:

  # systemctl status {{required}}
  # journalctl -ru {{required}}
  "),
        );
    } else if dependent.enabled && !required.enabled {
        sink.warn(
            "sdUnitReqEnabled",
            msg("
systemd unit {{unit}} is enabled to run automatically at boot, but {{required}} is not.
{{reason}}
An administrator can enable the {{required}} unit with:

  # systemctl enable {{required}}
  "),
        );
    }
}

/// openshift-sdn-node starts openshift-node itself, so the node only needs to
/// be running whenever the SDN node is.
pub fn check_sdn_node_started_node(sink: &mut dyn LogSink, units: &UnitSnapshot) {
    if units.get("openshift-sdn-node").active && !units.get("openshift-node").active {
        sink.error(
            "sdUnitSDNreqSN",
            Msg::new(
                "
systemd unit openshift-sdn-node is running but openshift-node is not.
Normally openshift-sdn-node starts openshift-node once initialized.
It is likely that openshift-node has crashed or been stopped.

An administrator can start openshift-node with:

  # systemctl start openshift-node

To ensure it is not repeatedly failing to run, check the status and logs with:

  # systemctl status openshift-node
  # journalctl -ru openshift-node ",
            ),
        );
    }
}

/// Warns about every unit that starts at boot but is not running, in name order.
pub fn check_enabled_units_active(sink: &mut dyn LogSink, units: &UnitSnapshot) {
    for unit in units.iter().filter(|unit| unit.enabled && !unit.active) {
        sink.warn(
            "sdUnitInactive",
            Msg::new(
                "
The {{unit}} systemd unit is intended to start at boot but is not currently active.
An administrator can start the {{unit}} unit with:

  # systemctl start {{unit}}

To ensure it is not failing to run, check the status and logs with:

  # systemctl status {{unit}}
  # journalctl -ru {{unit}}",
            )
            .with("unit", unit.name.as_str()),
        );
    }
}

pub fn check_unit_status(sink: &mut dyn LogSink, units: &UnitSnapshot, rules: &[DependencyRule]) {
    for rule in rules {
        unit_requires_unit(
            sink,
            &units.get(rule.dependent),
            &units.get(rule.required),
            rule.rationale,
        );
    }
    check_sdn_node_started_node(sink, units);
    check_enabled_units_active(sink, units);
}
