//! Employee records in SQLite, and the operations that expose them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use toolbridge_tool_runtime::{
    InputSchema, OperationError, OperationRegistry, ParamKind, ParamSpec, RegistryError,
};

/// One row of the `employees` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub role: String,
    pub salary: f64,
}

/// Handle to the employee database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EmployeeStore {
    pool: SqlitePool,
}

impl EmployeeStore {
    /// Open (creating if needed) the database at `path` and make sure the
    /// table exists. `":memory:"` gives a private in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let (connection_string, max_connections) = if path == ":memory:" {
            // Every in-memory connection is its own database.
            ("sqlite::memory:".to_string(), 1)
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
                }
            }
            (format!("sqlite://{path}"), 5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(SqliteConnectOptions::from_str(&connection_string)?.create_if_missing(true))
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS employees (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                role TEXT NOT NULL,
                salary REAL NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        tracing::info!(path = %path, "Employee store ready");
        Ok(Self { pool })
    }

    /// Insert a record and return it with its assigned id.
    pub async fn add(&self, name: &str, role: &str, salary: f64) -> Result<Employee, sqlx::Error> {
        let id = sqlx::query("INSERT INTO employees (name, role, salary) VALUES (?, ?, ?)")
            .bind(name)
            .bind(role)
            .bind(salary)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        tracing::debug!(id, name = %name, "Inserted employee");
        Ok(Employee {
            id,
            name: name.to_string(),
            role: role.to_string(),
            salary,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<Employee>, sqlx::Error> {
        sqlx::query_as::<_, Employee>("SELECT id, name, role, salary FROM employees WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// All records, ordered by id.
    pub async fn all(&self) -> Result<Vec<Employee>, sqlx::Error> {
        sqlx::query_as::<_, Employee>("SELECT id, name, role, salary FROM employees ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, Deserialize)]
struct NewEmployee {
    name: String,
    role: String,
    salary: f64,
}

#[derive(Debug, Deserialize)]
struct EmployeeId {
    emp_id: i64,
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, OperationError> {
    serde_json::to_value(value).map_err(|e| OperationError::Other(e.into()))
}

/// Register `add_employee`, `get_employee_by_id` and `get_all_employees`
/// backed by `store`.
pub fn register(registry: &mut OperationRegistry, store: EmployeeStore) -> Result<(), RegistryError> {
    let s = store.clone();
    registry.register_fn(
        "add_employee",
        "Add a new employee to the database.",
        InputSchema::new()
            .param("name", ParamSpec::required(ParamKind::String).describe("Full name"))
            .param("role", ParamSpec::required(ParamKind::String).describe("Job title or role"))
            .param("salary", ParamSpec::required(ParamKind::Float).describe("Salary amount")),
        move |args| {
            let store = s.clone();
            async move {
                let new: NewEmployee = args.parse()?;
                let employee = store
                    .add(&new.name, &new.role, new.salary)
                    .await
                    .map_err(anyhow::Error::from)?;
                to_value(&employee)
            }
        },
    )?;

    let s = store.clone();
    registry.register_fn(
        "get_employee_by_id",
        "Fetch a single employee by ID.",
        InputSchema::new().param(
            "emp_id",
            ParamSpec::required(ParamKind::Int).describe("Unique employee identifier"),
        ),
        move |args| {
            let store = s.clone();
            async move {
                let EmployeeId { emp_id } = args.parse()?;
                match store.get(emp_id).await.map_err(anyhow::Error::from)? {
                    Some(employee) => to_value(&employee),
                    None => Err(OperationError::NotFound(format!("Employee with ID {emp_id}"))),
                }
            }
        },
    )?;

    registry.register_fn(
        "get_all_employees",
        "Fetch all employees from the database.",
        InputSchema::new(),
        move |_args| {
            let store = store.clone();
            async move {
                let employees = store.all().await.map_err(anyhow::Error::from)?;
                to_value(&employees)
            }
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use toolbridge_tool_runtime::InvocationResult;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn registry_with_store() -> (OperationRegistry, EmployeeStore) {
        let store = EmployeeStore::open(":memory:").await.unwrap();
        let mut registry = OperationRegistry::new();
        register(&mut registry, store.clone()).unwrap();
        (registry, store)
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let store = EmployeeStore::open(":memory:").await.unwrap();
        let alice = store.add("Alice", "Data Scientist", 120000.0).await.unwrap();
        let bob = store.add("Bob", "ML Engineer", 110000.0).await.unwrap();
        assert!(bob.id > alice.id);

        assert_eq!(store.get(alice.id).await.unwrap(), Some(alice.clone()));
        assert_eq!(store.get(bob.id + 100).await.unwrap(), None);
        assert_eq!(store.all().await.unwrap(), vec![alice, bob]);
    }

    #[tokio::test]
    async fn test_open_file_creates_table_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("employees.db");
        let path = path.to_str().unwrap();

        let store = EmployeeStore::open(path).await.unwrap();
        store.add("Alice", "Data Scientist", 120000.0).await.unwrap();
        store.close().await;

        let reopened = EmployeeStore::open(path).await.unwrap();
        assert_eq!(reopened.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_then_get_operations() {
        let (registry, _store) = registry_with_store().await;

        let added = registry
            .invoke(
                "add_employee",
                object(json!({"name": "Alice", "role": "Data Scientist", "salary": 120000})),
            )
            .await
            .unwrap()
            .into_result()
            .unwrap();
        let id = added["id"].as_i64().unwrap();

        let fetched = registry
            .invoke("get_employee_by_id", object(json!({"emp_id": id})))
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(fetched, added);
        assert_eq!(fetched["name"], "Alice");
        assert_eq!(fetched["role"], "Data Scientist");
        assert_eq!(fetched["salary"].as_f64(), Some(120000.0));
    }

    #[tokio::test]
    async fn test_missing_employee_is_not_found() {
        let (registry, _store) = registry_with_store().await;
        let result = registry
            .invoke("get_employee_by_id", object(json!({"emp_id": 42})))
            .await
            .unwrap();
        assert_eq!(
            result,
            InvocationResult::Failure {
                message: "Employee with ID 42 not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_get_all_employees_ordered_by_id() {
        let (registry, store) = registry_with_store().await;
        store.add("Bob", "ML Engineer", 110000.0).await.unwrap();
        store.add("Alice", "Data Scientist", 120000.0).await.unwrap();

        let all = registry
            .invoke("get_all_employees", Map::new())
            .await
            .unwrap()
            .into_result()
            .unwrap();
        let names: Vec<_> = all
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["Bob", "Alice"]);
    }

    #[tokio::test]
    async fn test_float_emp_id_is_rejected() {
        let (registry, _store) = registry_with_store().await;
        let err = registry
            .invoke("get_employee_by_id", object(json!({"emp_id": 1.5})))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArguments { .. }));
    }
}
