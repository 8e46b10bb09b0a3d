// Protocol Definition Table
// Per-endpoint mapping from event name to (numeric id, expected payload
// length) and from constant name to a signed 16-bit value. Rebuilt wholesale
// whenever the owning application pushes a new table.

use serde::{Deserialize, Serialize};

use super::value::PropertyValue;
use super::ProtocolError;

/// A named event known to the endpoint. Its numeric id is its index in the
/// table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDef {
    pub name: String,
    /// Expected payload length in wire words.
    pub size: usize,
}

impl EventDef {
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            name: name.to_string(),
            size,
        }
    }
}

/// A named integer constant shared with the robot program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedConstant {
    pub name: String,
    pub value: i16,
}

/// The per-endpoint protocol definition table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDefs {
    events: Vec<EventDef>,
    constants: Vec<NamedConstant>,
}

impl ProtocolDefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look an event up by name, returning its definition and numeric id.
    pub fn event_by_name(&self, name: &str) -> Option<(&EventDef, u16)> {
        self.events
            .iter()
            .position(|e| e.name == name)
            .map(|i| (&self.events[i], i as u16))
    }

    /// Look an event up by its numeric id.
    pub fn event_by_id(&self, id: u16) -> Option<&EventDef> {
        self.events.get(id as usize)
    }

    pub fn events(&self) -> &[EventDef] {
        &self.events
    }

    pub fn constants(&self) -> &[NamedConstant] {
        &self.constants
    }

    pub fn constant(&self, name: &str) -> Option<i16> {
        self.constants
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    /// Wholesale replacement of the event table. No partial merge.
    pub fn set_events_table(&mut self, events: Vec<EventDef>) {
        self.events = events;
    }

    /// Apply a batch of shared-variable updates.
    ///
    /// Each entry first removes any existing constant with that name; a
    /// Null value stops there. Integer values must fit the wire word type
    /// or the pass stops with `IncompatibleVariableType`; entries already
    /// processed stay applied (best-effort ordering, not atomic).
    pub fn set_shared_variables(
        &mut self,
        variables: Vec<(String, PropertyValue)>,
    ) -> Result<(), ProtocolError> {
        for (name, value) in variables {
            self.constants.retain(|c| c.name != name);
            if value.is_null() {
                continue;
            }
            match value.as_i16() {
                Some(v) => self.constants.push(NamedConstant { name, value: v }),
                None => return Err(ProtocolError::IncompatibleVariableType),
            }
        }
        Ok(())
    }
}
