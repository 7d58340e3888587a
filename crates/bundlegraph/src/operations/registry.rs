use crate::NodeKind;
use crate::operations::SharedNodeOperation;
use std::collections::BTreeMap;

#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations_by_kind: BTreeMap<NodeKind, SharedNodeOperation>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: NodeKind,
        operation: SharedNodeOperation,
    ) -> Option<SharedNodeOperation> {
        self.operations_by_kind.insert(kind, operation)
    }

    pub fn resolve(&self, kind: NodeKind) -> Option<SharedNodeOperation> {
        self.operations_by_kind.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<NodeKind> {
        self.operations_by_kind.keys().copied().collect()
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
