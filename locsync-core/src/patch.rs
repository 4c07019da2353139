//! Partial updates for external events.
//!
//! Each field is either left alone or set to an explicit value. Setting the
//! description to an empty string clears it on the source, which is why
//! "unset" and "set to empty" are distinct.

use std::collections::BTreeMap;

use crate::event::SourceEvent;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldPatch<T> {
    #[default]
    Unset,
    Set(T),
}

impl<T> FieldPatch<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, FieldPatch::Set(_))
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            FieldPatch::Set(v) => Some(v),
            FieldPatch::Unset => None,
        }
    }

    /// Prefer this value, falling back to `earlier` when unset.
    fn or(self, earlier: FieldPatch<T>) -> FieldPatch<T> {
        match self {
            FieldPatch::Set(v) => FieldPatch::Set(v),
            FieldPatch::Unset => earlier,
        }
    }
}

/// A metadata correction for one external event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub description: FieldPatch<String>,
    pub color_id: FieldPatch<String>,
    /// Private extended properties to set; keys not listed are left untouched
    pub private_properties: FieldPatch<BTreeMap<String, String>>,
}

impl EventPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = FieldPatch::Set(description.into());
        self
    }

    pub fn color(mut self, color_id: impl Into<String>) -> Self {
        self.color_id = FieldPatch::Set(color_id.into());
        self
    }

    pub fn private_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut props = match self.private_properties {
            FieldPatch::Set(props) => props,
            FieldPatch::Unset => BTreeMap::new(),
        };
        props.insert(key.into(), value.into());
        self.private_properties = FieldPatch::Set(props);
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.description.is_set() && !self.color_id.is_set() && !self.private_properties.is_set()
    }

    /// Combine with a later correction. Fields set in `later` win.
    pub fn merge(self, later: EventPatch) -> EventPatch {
        EventPatch {
            description: later.description.or(self.description),
            color_id: later.color_id.or(self.color_id),
            private_properties: later.private_properties.or(self.private_properties),
        }
    }

    /// Apply to an event the way the source would.
    pub fn apply(&self, event: &mut SourceEvent) {
        if let FieldPatch::Set(description) = &self.description {
            event.description = (!description.is_empty()).then(|| description.clone());
        }
        if let FieldPatch::Set(color_id) = &self.color_id {
            event.color_id = (!color_id.is_empty()).then(|| color_id.clone());
        }
        if let FieldPatch::Set(props) = &self.private_properties {
            for (key, value) in props {
                event.private_properties.insert(key.clone(), value.clone());
            }
        }
    }
}
