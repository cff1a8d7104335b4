//! Dependency validation
//!
//! Decides whether a claimed row may be sent to the controller yet, based on
//! other unresolved rows. Validators are looked up by object type in a
//! registry built at startup; new resource kinds register their own.

use std::collections::HashMap;

use tracing::debug;

use crate::db::{JournalDb, JournalRow, ObjectType, Operation};
use crate::error::{JournalError, StoreError};

/// Payload field of a port that names its parent network.
pub const PORT_PARENT_FIELD: &str = "network_id";

/// Read-only queries a validator may ask the store.
pub trait DependencyQueries {
    /// Any PENDING/PROCESSING row for `object_uuid` with one of `operations`
    /// (empty = any operation).
    fn has_unresolved_ops(&self, object_uuid: &str, operations: &[Operation]) -> Result<bool, StoreError>;

    /// Any PENDING/PROCESSING DELETE of a `child_type` whose payload names
    /// `parent_id` under `parent_field`.
    fn has_unresolved_child_delete(
        &self,
        child_type: &ObjectType,
        parent_field: &str,
        parent_id: &str,
    ) -> Result<bool, StoreError>;

    /// Any older PENDING/PROCESSING row with the same operation and object uuid.
    fn has_older_unresolved(&self, row: &JournalRow) -> Result<bool, StoreError>;
}

impl DependencyQueries for JournalDb {
    fn has_unresolved_ops(&self, object_uuid: &str, operations: &[Operation]) -> Result<bool, StoreError> {
        JournalDb::has_unresolved_ops(self, object_uuid, operations)
    }

    fn has_unresolved_child_delete(
        &self,
        child_type: &ObjectType,
        parent_field: &str,
        parent_id: &str,
    ) -> Result<bool, StoreError> {
        JournalDb::has_unresolved_child_delete(self, child_type, parent_field, parent_id)
    }

    fn has_older_unresolved(&self, row: &JournalRow) -> Result<bool, StoreError> {
        JournalDb::has_older_unresolved(self, row)
    }
}

/// A dependency check for one object type. Returns `Ok(false)` while the row
/// has to wait.
pub type Validator =
    Box<dyn Fn(&dyn DependencyQueries, &JournalRow) -> Result<bool, StoreError> + Send + Sync>;

/// Object type -> validator map.
pub struct ValidatorRegistry {
    validators: HashMap<ObjectType, Validator>,
}

impl ValidatorRegistry {
    /// Registry without any validators.
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// Registry with the network and port validators.
    pub fn with_defaults() -> Self {
        let mut validators: HashMap<ObjectType, Validator> = HashMap::new();
        validators.insert(ObjectType::network(), Box::new(validate_network_operation));
        validators.insert(ObjectType::port(), Box::new(validate_port_operation));
        Self { validators }
    }

    /// Add a validator. Each type may be registered once.
    pub fn register<F>(&mut self, object_type: ObjectType, validator: F) -> Result<(), JournalError>
    where
        F: Fn(&dyn DependencyQueries, &JournalRow) -> Result<bool, StoreError> + Send + Sync + 'static,
    {
        if self.validators.contains_key(&object_type) {
            return Err(JournalError::DuplicateValidator(object_type.to_string()));
        }
        self.validators.insert(object_type, Box::new(validator));
        Ok(())
    }

    pub fn is_registered(&self, object_type: &ObjectType) -> bool {
        self.validators.contains_key(object_type)
    }

    /// Run the validator registered for `row.object_type`.
    pub fn validate(&self, queries: &dyn DependencyQueries, row: &JournalRow) -> Result<bool, JournalError> {
        let validator = self
            .validators
            .get(&row.object_type)
            .ok_or_else(|| JournalError::UnregisteredType(row.object_type.to_string()))?;
        Ok(validator(queries, row)?)
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// An update waits for older unresolved rows of the same object.
fn is_valid_operation(queries: &dyn DependencyQueries, row: &JournalRow) -> Result<bool, StoreError> {
    Ok(!queries.has_older_unresolved(row)?)
}

/// Networks: a delete waits for the network's own create/update and for the
/// deletion of its ports; an update waits for older updates.
pub fn validate_network_operation(queries: &dyn DependencyQueries, row: &JournalRow) -> Result<bool, StoreError> {
    match row.operation {
        Operation::Delete => {
            if queries.has_unresolved_ops(&row.object_uuid, &[Operation::Update, Operation::Create])? {
                return Ok(false);
            }
            let ports_pending =
                queries.has_unresolved_child_delete(&ObjectType::port(), PORT_PARENT_FIELD, &row.object_uuid)?;
            Ok(!ports_pending)
        }
        Operation::Update => is_valid_operation(queries, row),
        Operation::Create => Ok(true),
    }
}

/// Ports: create/update wait for the parent network's create, then every
/// operation waits for older ones on the same port.
pub fn validate_port_operation(queries: &dyn DependencyQueries, row: &JournalRow) -> Result<bool, StoreError> {
    if matches!(row.operation, Operation::Create | Operation::Update) {
        match parent_network(row) {
            Some(network_id) => {
                if queries.has_unresolved_ops(&network_id, &[Operation::Create])? {
                    return Ok(false);
                }
            }
            None => debug!(row_id = %row.id, "Port payload names no parent network"),
        }
    }
    is_valid_operation(queries, row)
}

fn parent_network(row: &JournalRow) -> Option<String> {
    let payload = row.payload().ok()?;
    payload
        .get(PORT_PARENT_FIELD)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RowState;
    use serde_json::json;

    fn record(db: &JournalDb, object_type: ObjectType, uuid: &str, op: Operation, data: serde_json::Value) -> JournalRow {
        let id = db.create_pending(&object_type, uuid, op, &data).unwrap();
        db.get_row(id).unwrap().unwrap()
    }

    fn complete(db: &JournalDb, row: &JournalRow) {
        let mut row = row.clone();
        db.update_state(&mut row, RowState::Completed).unwrap();
    }

    #[test]
    fn test_network_create_is_always_valid() {
        let db = JournalDb::open_in_memory().unwrap();
        let registry = ValidatorRegistry::with_defaults();
        let row = record(&db, ObjectType::network(), "n1", Operation::Create, json!({"id": "n1"}));
        assert!(registry.validate(&db, &row).unwrap());
    }

    #[test]
    fn test_network_delete_waits_for_create() {
        let db = JournalDb::open_in_memory().unwrap();
        let registry = ValidatorRegistry::with_defaults();
        let create = record(&db, ObjectType::network(), "n1", Operation::Create, json!({"id": "n1"}));
        let delete = record(&db, ObjectType::network(), "n1", Operation::Delete, json!({"id": "n1"}));

        assert!(!registry.validate(&db, &delete).unwrap());
        complete(&db, &create);
        assert!(registry.validate(&db, &delete).unwrap());
    }

    #[test]
    fn test_network_delete_waits_for_port_delete() {
        let db = JournalDb::open_in_memory().unwrap();
        let registry = ValidatorRegistry::with_defaults();
        let port_delete = record(
            &db,
            ObjectType::port(),
            "p1",
            Operation::Delete,
            json!({"id": "p1", "network_id": "n1"}),
        );
        let net_delete = record(&db, ObjectType::network(), "n1", Operation::Delete, json!({"id": "n1"}));

        assert!(!registry.validate(&db, &net_delete).unwrap());
        complete(&db, &port_delete);
        assert!(registry.validate(&db, &net_delete).unwrap());
    }

    #[test]
    fn test_updates_resolve_in_creation_order() {
        let db = JournalDb::open_in_memory().unwrap();
        let registry = ValidatorRegistry::with_defaults();
        let first = record(&db, ObjectType::network(), "n1", Operation::Update, json!({"mtu": 1500}));
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = record(&db, ObjectType::network(), "n1", Operation::Update, json!({"mtu": 9000}));

        assert!(registry.validate(&db, &first).unwrap());
        assert!(!registry.validate(&db, &second).unwrap());

        complete(&db, &first);
        assert!(registry.validate(&db, &second).unwrap());
    }

    #[test]
    fn test_port_create_waits_for_network_create() {
        let db = JournalDb::open_in_memory().unwrap();
        let registry = ValidatorRegistry::with_defaults();
        let network = record(&db, ObjectType::network(), "n1", Operation::Create, json!({"id": "n1"}));
        let port = record(
            &db,
            ObjectType::port(),
            "p1",
            Operation::Create,
            json!({"id": "p1", "network_id": "n1"}),
        );

        assert!(!registry.validate(&db, &port).unwrap());
        complete(&db, &network);
        assert!(registry.validate(&db, &port).unwrap());
    }

    #[test]
    fn test_port_without_network_id_has_no_parent_dependency() {
        let db = JournalDb::open_in_memory().unwrap();
        let registry = ValidatorRegistry::with_defaults();
        let port = record(&db, ObjectType::port(), "p1", Operation::Create, json!({"id": "p1"}));
        assert!(registry.validate(&db, &port).unwrap());
    }

    #[test]
    fn test_unregistered_type_fails_loudly() {
        let db = JournalDb::open_in_memory().unwrap();
        let registry = ValidatorRegistry::with_defaults();
        let row = record(&db, ObjectType::new("router"), "r1", Operation::Create, json!({}));

        let err = registry.validate(&db, &row).unwrap_err();
        assert!(matches!(err, JournalError::UnregisteredType(t) if t == "router"));
    }

    #[test]
    fn test_register_custom_validator() {
        let db = JournalDb::open_in_memory().unwrap();
        let mut registry = ValidatorRegistry::new();
        registry
            .register(ObjectType::new("router"), |_queries, row| Ok(row.operation != Operation::Delete))
            .unwrap();

        let create = record(&db, ObjectType::new("router"), "r1", Operation::Create, json!({}));
        let delete = record(&db, ObjectType::new("router"), "r1", Operation::Delete, json!({}));
        assert!(registry.validate(&db, &create).unwrap());
        assert!(!registry.validate(&db, &delete).unwrap());
        assert!(!registry.is_registered(&ObjectType::network()));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ValidatorRegistry::with_defaults();
        let err = registry
            .register(ObjectType::network(), |_queries, _row| Ok(true))
            .unwrap_err();
        assert!(matches!(err, JournalError::DuplicateValidator(_)));
    }
}
