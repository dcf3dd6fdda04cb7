//! Abstract forwarding rules and the per-circuit flow builder.
//!
//! Rules are transport-agnostic: the builder turns a tagged path plus
//! the two UNI bindings into per-switch rule batches, and the
//! flow-manager boundary decides how they reach the switches.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use eline_types::{Link, Path, TagType};

use crate::error::{EvcError, EvcResult};
use crate::evc::Uni;

/// Match fields of a forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMatch {
    /// Ingress port number.
    pub in_port: u32,
    /// VLAN id to match, absent for untagged traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dl_vlan: Option<u16>,
}

/// One action of a forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum FlowAction {
    /// Forward out of a port.
    Output {
        /// Egress port number.
        port: u32,
    },
    /// Rewrite the outermost VLAN id.
    SetVlan {
        /// New VLAN id.
        vlan_id: u16,
    },
    /// Push a new outer VLAN header.
    PushVlan {
        /// Kind of tag pushed.
        tag_type: TagType,
    },
    /// Pop the outer VLAN header.
    PopVlan,
}

/// An abstract forwarding rule for one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMod {
    /// Circuit cookie; all rules of one circuit share it.
    pub cookie: u64,
    /// Match fields.
    #[serde(rename = "match")]
    pub match_fields: FlowMatch,
    /// Action list, executed in order.
    pub actions: Vec<FlowAction>,
}

/// Rules grouped by destination switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowBatch {
    /// Target switch dpid.
    pub switch: String,
    /// Rules for that switch.
    pub flows: Vec<FlowMod>,
}

/// Service tags chosen for one deployment, keyed by link.
///
/// The allocation is scoped to the path being deployed; it is built at
/// deploy time and discarded with the deployment.
#[derive(Debug, Clone, Default)]
pub struct TagAllocation {
    tags: HashMap<String, u16>,
}

impl TagAllocation {
    /// Creates an empty allocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the tag chosen for a link.
    pub fn insert(&mut self, link: &Link, tag: u16) {
        self.tags.insert(link.id(), tag);
    }

    /// Returns the tag chosen for a link.
    pub fn get(&self, link: &Link) -> Option<u16> {
        self.tags.get(&link.id()).copied()
    }

    /// Returns the number of allocated tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns true if nothing was allocated.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Returns the switch shared by two adjacent links of a path.
fn shared_switch(incoming: &Link, outgoing: &Link) -> Option<String> {
    for switch in [
        &incoming.endpoint_a().switch,
        &incoming.endpoint_b().switch,
    ] {
        if outgoing.endpoint_on(switch).is_some() {
            return Some(switch.clone());
        }
    }
    None
}

/// Builds the full rule set of one circuit.
pub struct FlowBuilder {
    cookie: u64,
}

impl FlowBuilder {
    /// Creates a builder stamping every rule with the circuit cookie.
    pub fn new(cookie: u64) -> Self {
        Self { cookie }
    }

    /// Base rule: match on the ingress port, forward to the egress port.
    fn base_flow(&self, in_port: u32, out_port: u32) -> FlowMod {
        FlowMod {
            cookie: self.cookie,
            match_fields: FlowMatch {
                in_port,
                dl_vlan: None,
            },
            actions: vec![FlowAction::Output { port: out_port }],
        }
    }

    /// NNI rule: rewrite the outer tag while crossing a switch.
    pub fn nni_flow(&self, in_port: u32, out_port: u32, in_tag: u16, out_tag: u16) -> FlowMod {
        let mut flow = self.base_flow(in_port, out_port);
        flow.match_fields.dl_vlan = Some(in_tag);
        flow.actions
            .insert(0, FlowAction::SetVlan { vlan_id: out_tag });
        flow
    }

    /// UNI ingress rule: rewrite the inner tag to the far end's user
    /// tag, push the outer service tag and forward into the path.
    pub fn push_flow(
        &self,
        in_port: u32,
        out_port: u32,
        in_tag: Option<u16>,
        out_tag: u16,
        new_inner_tag: Option<u16>,
    ) -> FlowMod {
        let mut flow = self.base_flow(in_port, out_port);
        flow.match_fields.dl_vlan = in_tag;

        flow.actions
            .insert(0, FlowAction::SetVlan { vlan_id: out_tag });
        flow.actions.insert(
            0,
            FlowAction::PushVlan {
                tag_type: TagType::S,
            },
        );
        if let Some(inner) = new_inner_tag {
            flow.actions.insert(0, FlowAction::SetVlan { vlan_id: inner });
        }
        flow
    }

    /// UNI egress rule: pop the outer service tag and forward to the
    /// user port.
    pub fn pop_flow(&self, in_port: u32, out_port: u32, out_tag: u16) -> FlowMod {
        let mut flow = self.base_flow(in_port, out_port);
        flow.match_fields.dl_vlan = Some(out_tag);
        flow.actions.insert(0, FlowAction::PopVlan);
        flow
    }

    /// Builds the NNI rule batches for every internal boundary of the
    /// path: two rules per adjacent link pair, at the shared switch.
    pub fn nni_flows(&self, path: &Path, tags: &TagAllocation) -> EvcResult<Vec<FlowBatch>> {
        let mut batches = Vec::new();

        for (incoming, outgoing) in path.adjacent_pairs() {
            let switch = shared_switch(incoming, outgoing).ok_or_else(|| {
                EvcError::internal(format!(
                    "Links {} and {} are adjacent but share no switch",
                    incoming, outgoing
                ))
            })?;

            let in_iface = incoming
                .endpoint_on(&switch)
                .ok_or_else(|| EvcError::internal("missing endpoint on shared switch"))?;
            let out_iface = outgoing
                .endpoint_on(&switch)
                .ok_or_else(|| EvcError::internal("missing endpoint on shared switch"))?;

            let in_tag = tags
                .get(incoming)
                .ok_or_else(|| EvcError::internal(format!("No tag allocated for {}", incoming)))?;
            let out_tag = tags
                .get(outgoing)
                .ok_or_else(|| EvcError::internal(format!("No tag allocated for {}", outgoing)))?;

            batches.push(FlowBatch {
                switch,
                flows: vec![
                    self.nni_flow(
                        in_iface.port_number,
                        out_iface.port_number,
                        in_tag,
                        out_tag,
                    ),
                    self.nni_flow(
                        out_iface.port_number,
                        in_iface.port_number,
                        out_tag,
                        in_tag,
                    ),
                ],
            });
        }

        Ok(batches)
    }

    /// Builds the UNI rule batches at both ends of the path: an ingress
    /// push rule and an egress pop rule per UNI switch. The push rule
    /// rewrites the inner tag to the other endpoint's user tag, so the
    /// two UNIs may use different user tags.
    pub fn uni_flows(
        &self,
        path: &Path,
        tags: &TagAllocation,
        uni_a: &Uni,
        uni_z: &Uni,
    ) -> EvcResult<Vec<FlowBatch>> {
        let (first, last) = match (path.first(), path.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(vec![]),
        };

        let a_side = first
            .endpoint_on(&uni_a.interface.switch)
            .ok_or_else(|| EvcError::internal("Path does not start at uni_a's switch"))?;
        let z_side = last
            .endpoint_on(&uni_z.interface.switch)
            .ok_or_else(|| EvcError::internal("Path does not end at uni_z's switch"))?;

        let in_tag_a = uni_a.user_tag_value();
        let out_tag_a = tags
            .get(first)
            .ok_or_else(|| EvcError::internal(format!("No tag allocated for {}", first)))?;
        let in_tag_z = uni_z.user_tag_value();
        let out_tag_z = tags
            .get(last)
            .ok_or_else(|| EvcError::internal(format!("No tag allocated for {}", last)))?;

        Ok(vec![
            FlowBatch {
                switch: uni_a.interface.switch.clone(),
                flows: vec![
                    self.push_flow(
                        uni_a.interface.port_number,
                        a_side.port_number,
                        in_tag_a,
                        out_tag_a,
                        in_tag_z,
                    ),
                    self.pop_flow(a_side.port_number, uni_a.interface.port_number, out_tag_a),
                ],
            },
            FlowBatch {
                switch: uni_z.interface.switch.clone(),
                flows: vec![
                    self.push_flow(
                        uni_z.interface.port_number,
                        z_side.port_number,
                        in_tag_z,
                        out_tag_z,
                        in_tag_a,
                    ),
                    self.pop_flow(z_side.port_number, uni_z.interface.port_number, out_tag_z),
                ],
            },
        ])
    }
}
