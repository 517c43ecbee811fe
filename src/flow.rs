//! Flow units and the session that routes them
//!
//! A [`ProcessSession`] is the processor's view of one batch of work: it hands
//! out queued [`FlowUnit`]s, derives child units, and records where each unit
//! was routed. Nothing is visible to the host until [`ProcessSession::commit`].

use crate::error::{ProcessError, ProcessResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Cursor, Read};
use std::sync::Arc;
use uuid::Uuid;

/// Attribute holding the flow unit's unique id
pub const UUID_ATTRIBUTE: &str = "uuid";

/// Attribute holding the flow unit's file name
pub const FILENAME_ATTRIBUTE: &str = "filename";

/// String attributes carried by a flow unit
pub type Attributes = HashMap<String, String>;

/// Unit of work: an immutable payload plus string attributes
#[derive(Debug, Clone)]
pub struct FlowUnit {
    id: Uuid,
    attributes: Attributes,
    content: Arc<[u8]>,
}

impl FlowUnit {
    /// Create a new flow unit with a fresh id
    pub fn new(content: impl Into<Vec<u8>>, attributes: Attributes) -> Self {
        let id = Uuid::new_v4();
        let mut attributes = attributes;
        attributes.insert(UUID_ATTRIBUTE.to_string(), id.to_string());
        Self {
            id,
            attributes,
            content: Arc::from(content.into()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn put_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn put_all_attributes(&mut self, attributes: Attributes) {
        self.attributes.extend(attributes);
    }

    fn derive(&self) -> Self {
        let id = Uuid::new_v4();
        let mut attributes = self.attributes.clone();
        attributes.insert(UUID_ATTRIBUTE.to_string(), id.to_string());
        Self {
            id,
            attributes,
            content: Arc::from(Vec::<u8>::new()),
        }
    }
}

/// Named destination a flow unit is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relationship {
    Success,
    Failure,
}

impl Relationship {
    pub fn name(&self) -> &'static str {
        match self {
            Relationship::Success => "success",
            Relationship::Failure => "failure",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Relationship::Success => {
                "Flow units whose records were filtered and rewritten successfully"
            }
            Relationship::Failure => {
                "If a flow unit cannot be transformed from the configured input format to the \
                 configured output format, the unchanged flow unit is routed here"
            }
        }
    }
}

/// Everything a committed session produced
#[derive(Debug, Default)]
pub struct SessionOutcome {
    /// Flow units routed to a relationship, in routing order
    pub transferred: Vec<(Relationship, FlowUnit)>,
    /// Ids of consumed flow units
    pub removed: Vec<Uuid>,
}

impl SessionOutcome {
    pub fn routed_to(&self, relationship: Relationship) -> Vec<&FlowUnit> {
        self.transferred
            .iter()
            .filter(|(rel, _)| *rel == relationship)
            .map(|(_, flow)| flow)
            .collect()
    }
}

/// In-memory process session
#[derive(Debug, Default)]
pub struct ProcessSession {
    queue: VecDeque<FlowUnit>,
    /// Units handed out by `get` that still need a routing decision
    acquired: HashSet<Uuid>,
    /// Derived units that still need a routing decision
    created: HashSet<Uuid>,
    transferred: Vec<(Relationship, FlowUnit)>,
    removed: Vec<Uuid>,
}

impl ProcessSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a flow unit for processing
    pub fn enqueue(&mut self, flow: FlowUnit) {
        self.queue.push_back(flow);
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Take the next queued flow unit
    pub fn get(&mut self) -> Option<FlowUnit> {
        let flow = self.queue.pop_front()?;
        self.acquired.insert(flow.id());
        Some(flow)
    }

    /// Open the payload of a flow unit for reading
    pub fn read(&self, flow: &FlowUnit) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(Arc::clone(&flow.content)))
    }

    /// Derive a new, empty flow unit that inherits the parent's attributes
    pub fn create(&mut self, parent: &FlowUnit) -> FlowUnit {
        let child = parent.derive();
        self.created.insert(child.id());
        child
    }

    /// Replace the payload of a derived flow unit
    pub fn write(&self, flow: &mut FlowUnit, content: Vec<u8>) {
        flow.content = Arc::from(content);
    }

    /// Route a flow unit to a relationship
    pub fn transfer(&mut self, flow: FlowUnit, relationship: Relationship) -> ProcessResult<()> {
        let id = flow.id();
        if !self.acquired.remove(&id) && !self.created.remove(&id) {
            return Err(ProcessError::session(format!(
                "Flow unit {} is not pending in this session",
                id
            )));
        }
        self.transferred.push((relationship, flow));
        Ok(())
    }

    /// Consume an acquired flow unit
    pub fn remove(&mut self, flow: FlowUnit) -> ProcessResult<()> {
        let id = flow.id();
        if !self.acquired.remove(&id) {
            return Err(ProcessError::session(format!(
                "Flow unit {} cannot be removed: not acquired or already routed",
                id
            )));
        }
        self.removed.push(id);
        Ok(())
    }

    /// Drop a derived flow unit without emitting it
    pub fn discard(&mut self, flow: FlowUnit) {
        self.created.remove(&flow.id());
    }

    /// Finish the session; every acquired or derived unit must have been routed
    pub fn commit(self) -> ProcessResult<SessionOutcome> {
        if let Some(id) = self.acquired.iter().chain(self.created.iter()).next() {
            return Err(ProcessError::session(format!(
                "Flow unit {} was neither transferred nor removed",
                id
            )));
        }

        Ok(SessionOutcome {
            transferred: self.transferred,
            removed: self.removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(content: &str) -> FlowUnit {
        let mut attributes = Attributes::new();
        attributes.insert(FILENAME_ATTRIBUTE.to_string(), "cdr.csv".to_string());
        FlowUnit::new(content.as_bytes().to_vec(), attributes)
    }

    #[test]
    fn test_derived_unit_inherits_attributes() {
        let mut session = ProcessSession::new();
        session.enqueue(flow("a|b"));
        assert_eq!(session.queued(), 1);
        let parent = session.get().unwrap();
        assert_eq!(session.queued(), 0);
        let child = session.create(&parent);

        assert_ne!(parent.id(), child.id());
        assert_eq!(child.attribute(FILENAME_ATTRIBUTE), Some("cdr.csv"));
        assert_eq!(child.attribute(UUID_ATTRIBUTE), Some(child.id().to_string().as_str()));
        assert_eq!(child.size(), 0);
    }

    #[test]
    fn test_read_returns_payload() {
        let mut session = ProcessSession::new();
        session.enqueue(flow("hello"));
        let parent = session.get().unwrap();

        let mut buf = String::new();
        session.read(&parent).read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");
    }

    #[test]
    fn test_commit_requires_routing() {
        let mut session = ProcessSession::new();
        session.enqueue(flow("x"));
        let _parent = session.get().unwrap();
        assert!(matches!(session.commit(), Err(ProcessError::Session(_))));
    }

    #[test]
    fn test_success_path_commit() {
        let mut session = ProcessSession::new();
        session.enqueue(flow("x"));
        let parent = session.get().unwrap();
        let mut child = session.create(&parent);
        session.write(&mut child, b"out".to_vec());

        session.transfer(child, Relationship::Success).unwrap();
        let parent_id = parent.id();
        session.remove(parent).unwrap();

        let outcome = session.commit().unwrap();
        assert_eq!(outcome.routed_to(Relationship::Success).len(), 1);
        assert_eq!(outcome.routed_to(Relationship::Success)[0].content(), b"out");
        assert_eq!(outcome.removed, vec![parent_id]);
    }

    #[test]
    fn test_failure_path_discards_child() {
        let mut session = ProcessSession::new();
        session.enqueue(flow("x"));
        let parent = session.get().unwrap();
        let child = session.create(&parent);

        session.discard(child);
        session.transfer(parent.clone(), Relationship::Failure).unwrap();
        assert!(session.transfer(parent, Relationship::Failure).is_err());

        let outcome = session.commit().unwrap();
        assert!(outcome.routed_to(Relationship::Success).is_empty());
        assert_eq!(outcome.routed_to(Relationship::Failure).len(), 1);
    }
}
