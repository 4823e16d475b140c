use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Result, SimError};
use crate::waveform::SourceSpec;

/// Index of the ground node. It never appears as an unknown.
pub const GROUND: usize = 0;

/// Bijection between node names and node indices.
///
/// Index 0 is always ground; every other name gets the next free index in
/// order of first appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTable {
    names: Vec<String>,
    #[serde(skip)]
    lookup: HashMap<String, usize>,
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTable {
    pub fn new() -> Self {
        let mut lookup = HashMap::new();
        lookup.insert("0".to_string(), GROUND);
        NodeTable {
            names: vec!["0".to_string()],
            lookup,
        }
    }

    pub fn is_ground_name(name: &str) -> bool {
        name == "0" || name.eq_ignore_ascii_case("gnd") || name.eq_ignore_ascii_case("ground")
    }

    /// Return the index of `name`, assigning a new one on first use.
    pub fn intern(&mut self, name: &str) -> usize {
        if Self::is_ground_name(name) {
            return GROUND;
        }
        if self.lookup.is_empty() {
            self.rebuild_lookup();
        }
        if let Some(&index) = self.lookup.get(name) {
            return index;
        }
        let index = self.names.len();
        self.names.push(name.to_string());
        self.lookup.insert(name.to_string(), index);
        index
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        if Self::is_ground_name(name) {
            return Some(GROUND);
        }
        match self.lookup.get(name) {
            Some(&index) => Some(index),
            // Tables coming out of serde have an empty lookup
            None => self.names.iter().position(|n| n == name),
        }
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Number of non-ground nodes.
    pub fn count(&self) -> usize {
        self.names.len().saturating_sub(1)
    }

    /// Check a table that did not come from [`NodeTable::intern`]: ground
    /// first, no ground alias after it and no name twice.
    pub fn validate(&self) -> Result<()> {
        match self.names.first() {
            None => return Err(SimError::InvalidNodeTable("no ground entry".to_string())),
            Some(first) if !Self::is_ground_name(first) => {
                return Err(SimError::InvalidNodeTable(format!(
                    "index 0 must be ground, found '{}'",
                    first
                )))
            }
            Some(_) => {}
        }

        let mut seen = HashSet::new();
        for (index, name) in self.names.iter().enumerate().skip(1) {
            if Self::is_ground_name(name) {
                return Err(SimError::InvalidNodeTable(format!(
                    "ground alias '{}' at index {}",
                    name, index
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(SimError::InvalidNodeTable(format!("node '{}' listed twice", name)));
            }
        }
        Ok(())
    }

    fn rebuild_lookup(&mut self) {
        self.lookup = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
    }
}

/// Element kinds understood by the assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Resistor,
    Capacitor,
    Inductor,
    VoltageSource(SourceSpec),
    CurrentSource(SourceSpec),
}

impl ElementKind {
    /// Group-2 elements get their own branch-current unknown.
    pub fn is_group2(&self) -> bool {
        matches!(self, ElementKind::VoltageSource(_) | ElementKind::Inductor)
    }

    pub fn is_source(&self) -> bool {
        matches!(self, ElementKind::VoltageSource(_) | ElementKind::CurrentSource(_))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, ElementKind::Capacitor | ElementKind::Inductor)
    }

    pub fn source_spec(&self) -> Option<&SourceSpec> {
        match self {
            ElementKind::VoltageSource(spec) | ElementKind::CurrentSource(spec) => Some(spec),
            _ => None,
        }
    }
}

/// Two-terminal circuit element with resolved node indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    pub kind: ElementKind,
    /// Positive terminal node index
    pub pos: usize,
    /// Negative terminal node index
    pub neg: usize,
    /// Resistance, capacitance, inductance or DC source value
    pub value: f64,
}

impl Element {
    pub fn resistor(name: &str, pos: usize, neg: usize, resistance: f64) -> Self {
        Self::new(name, ElementKind::Resistor, pos, neg, resistance)
    }

    pub fn capacitor(name: &str, pos: usize, neg: usize, capacitance: f64) -> Self {
        Self::new(name, ElementKind::Capacitor, pos, neg, capacitance)
    }

    pub fn inductor(name: &str, pos: usize, neg: usize, inductance: f64) -> Self {
        Self::new(name, ElementKind::Inductor, pos, neg, inductance)
    }

    pub fn voltage_source(name: &str, pos: usize, neg: usize, voltage: f64) -> Self {
        Self::new(name, ElementKind::VoltageSource(SourceSpec::default()), pos, neg, voltage)
    }

    pub fn current_source(name: &str, pos: usize, neg: usize, current: f64) -> Self {
        Self::new(name, ElementKind::CurrentSource(SourceSpec::default()), pos, neg, current)
    }

    fn new(name: &str, kind: ElementKind, pos: usize, neg: usize, value: f64) -> Self {
        Element {
            name: name.to_string(),
            kind,
            pos,
            neg,
            value,
        }
    }

    /// Attach AC / transient excitation. No effect on passive elements.
    pub fn with_spec(mut self, spec: SourceSpec) -> Self {
        match &mut self.kind {
            ElementKind::VoltageSource(s) | ElementKind::CurrentSource(s) => *s = spec,
            _ => {}
        }
        self
    }

    /// Source value for the DC pass or for time `t` of a transient run.
    pub fn source_value(&self, time: Option<f64>) -> f64 {
        match (time, self.kind.source_spec().and_then(|s| s.waveform.as_ref())) {
            (Some(t), Some(waveform)) => waveform.value_at(t),
            _ => self.value,
        }
    }

    /// Validate the element against a circuit with `node_count` non-ground nodes
    pub fn validate(&self, node_count: usize) -> Result<()> {
        if self.pos > node_count || self.neg > node_count {
            return Err(SimError::invalid_element(
                &self.name,
                format!("terminal index out of range (circuit has {} nodes)", node_count),
            ));
        }
        if !self.value.is_finite() {
            return Err(SimError::invalid_element(&self.name, "value must be finite"));
        }

        match &self.kind {
            ElementKind::Resistor | ElementKind::Capacitor | ElementKind::Inductor => {
                if self.value <= 0.0 {
                    return Err(SimError::invalid_element(
                        &self.name,
                        format!("value must be positive, got {}", self.value),
                    ));
                }
            }
            ElementKind::VoltageSource(spec) | ElementKind::CurrentSource(spec) => {
                if let Some(waveform) = &spec.waveform {
                    waveform
                        .validate()
                        .map_err(|reason| SimError::invalid_element(&self.name, reason))?;
                }
            }
        }

        Ok(())
    }
}

/// Complete circuit description consumed by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Circuit {
    #[serde(default)]
    pub title: String,
    pub nodes: NodeTable,
    pub elements: Vec<Element>,
}

impl Circuit {
    pub fn new(title: &str) -> Self {
        Circuit {
            title: title.to_string(),
            nodes: NodeTable::new(),
            elements: Vec::new(),
        }
    }

    /// Add a node to the circuit and return its index
    pub fn node(&mut self, name: &str) -> usize {
        self.nodes.intern(name)
    }

    /// Add an element to the circuit
    pub fn add_element(&mut self, element: Element) -> Result<()> {
        element.validate(self.node_count())?;
        if self.find_element(&element.name).is_some() {
            return Err(SimError::DuplicateElement(element.name));
        }
        debug!("Adding element {} ({:?})", element.name, element.kind);
        self.elements.push(element);
        Ok(())
    }

    /// Validate the node table and every element, e.g. after deserialisation.
    pub fn validate(&self) -> Result<()> {
        self.nodes.validate()?;
        let mut seen = HashSet::new();
        for element in &self.elements {
            element.validate(self.node_count())?;
            if !seen.insert(element.name.to_ascii_lowercase()) {
                return Err(SimError::DuplicateElement(element.name.clone()));
            }
        }
        Ok(())
    }

    /// Number of non-ground nodes (`n`)
    pub fn node_count(&self) -> usize {
        self.nodes.count()
    }

    /// Number of group-2 elements (`m`)
    pub fn group2_count(&self) -> usize {
        self.elements.iter().filter(|e| e.kind.is_group2()).count()
    }

    /// Total number of unknowns, `n + m`
    pub fn system_size(&self) -> usize {
        self.node_count() + self.group2_count()
    }

    /// Branch-current offset (0-based, relative to `n`) for every element.
    ///
    /// Group-2 elements are numbered in the order they appear.
    pub fn branch_indices(&self) -> Vec<Option<usize>> {
        let mut next = 0;
        self.elements
            .iter()
            .map(|e| {
                if e.kind.is_group2() {
                    next += 1;
                    Some(next - 1)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Look an element up by name (case-insensitive, like SPICE)
    pub fn find_element(&self, name: &str) -> Option<usize> {
        self.elements
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.index_of(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::Waveform;

    #[test]
    fn test_node_table() {
        let mut nodes = NodeTable::new();
        assert_eq!(nodes.intern("in"), 1);
        assert_eq!(nodes.intern("out"), 2);
        assert_eq!(nodes.intern("in"), 1);
        assert_eq!(nodes.intern("GND"), GROUND);
        assert_eq!(nodes.count(), 2);
        assert_eq!(nodes.name_of(2), Some("out"));
        assert_eq!(nodes.index_of("ground"), Some(GROUND));
        assert_eq!(nodes.index_of("missing"), None);
    }

    #[test]
    fn test_circuit_building() {
        let mut circuit = Circuit::new("Test Circuit");
        let a = circuit.node("1");
        let b = circuit.node("2");

        circuit.add_element(Element::voltage_source("V1", a, GROUND, 5.0)).unwrap();
        circuit.add_element(Element::resistor("R1", a, b, 1000.0)).unwrap();
        circuit.add_element(Element::inductor("L1", b, GROUND, 1e-3)).unwrap();
        circuit.add_element(Element::capacitor("C1", b, GROUND, 1e-6)).unwrap();

        assert_eq!(circuit.node_count(), 2);
        assert_eq!(circuit.group2_count(), 2);
        assert_eq!(circuit.system_size(), 4);
        assert_eq!(circuit.branch_indices(), vec![Some(0), None, Some(1), None]);
        assert_eq!(circuit.find_element("r1"), Some(1));
    }

    #[test]
    fn test_element_validation() {
        let mut circuit = Circuit::new("Bad");
        let a = circuit.node("a");

        let err = circuit.add_element(Element::resistor("R0", a, GROUND, 0.0)).unwrap_err();
        assert!(matches!(err, SimError::InvalidElement { .. }));

        let err = circuit.add_element(Element::resistor("R1", a, 7, 1.0)).unwrap_err();
        assert!(matches!(err, SimError::InvalidElement { .. }));

        circuit.add_element(Element::resistor("R2", a, GROUND, 1.0)).unwrap();
        let err = circuit.add_element(Element::resistor("r2", a, GROUND, 1.0)).unwrap_err();
        assert_eq!(err, SimError::DuplicateElement("r2".to_string()));
    }

    #[test]
    fn test_source_value_uses_waveform_in_time() {
        let spec = SourceSpec::default().with_waveform(Waveform::Pwl(vec![(0.0, 0.0), (1.0, 2.0)]));
        let source = Element::voltage_source("V1", 1, GROUND, 9.0).with_spec(spec);
        assert_eq!(source.source_value(None), 9.0);
        assert_eq!(source.source_value(Some(0.5)), 1.0);
    }

    #[test]
    fn test_deserialized_table_resolves_names() {
        let mut circuit = Circuit::new("serde");
        circuit.node("in");
        circuit.node("out");
        let json = serde_json::to_string(&circuit).unwrap();
        let restored: Circuit = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.node_index("out"), Some(2));
        assert_eq!(restored.node_count(), 2);
        restored.validate().unwrap();
    }

    #[test]
    fn test_malformed_node_tables_rejected() {
        let empty: Circuit =
            serde_json::from_str(r#"{"title": "t", "nodes": {"names": []}, "elements": []}"#).unwrap();
        assert_eq!(empty.node_count(), 0);
        assert!(matches!(empty.validate(), Err(SimError::InvalidNodeTable(_))));

        for names in [r#"["a", "b"]"#, r#"["0", "a", "gnd"]"#, r#"["0", "a", "a"]"#] {
            let json = format!(r#"{{"title": "t", "nodes": {{"names": {}}}, "elements": []}}"#, names);
            let circuit: Circuit = serde_json::from_str(&json).unwrap();
            let err = circuit.validate().unwrap_err();
            assert!(matches!(err, SimError::InvalidNodeTable(_)), "{}: {:?}", names, err);
            assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        }
    }
}
