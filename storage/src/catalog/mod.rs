use crate::file::HeapFile;
use crate::{Result, StorageError};
use heapdb_core::{DataType, FieldDef, TableId, TupleDesc};
use log::info;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

struct TableEntry {
    name: String,
    primary_key: String,
    file: Arc<HeapFile>,
}

/// Registry of tables: resolves a table id to its heap file and schema.
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<HashMap<TableId, TableEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under `name`. Re-adding a file replaces its entry;
    /// if another table already uses `name`, the newer table wins the name.
    pub fn add_table(&self, file: Arc<HeapFile>, name: &str, primary_key: &str) {
        let mut tables = self.tables.write();
        tables.retain(|id, entry| *id == file.id() || entry.name != name);
        tables.insert(
            file.id(),
            TableEntry {
                name: name.to_string(),
                primary_key: primary_key.to_string(),
                file,
            },
        );
    }

    /// Registers `file` under a random name.
    pub fn add_unnamed_table(&self, file: Arc<HeapFile>) -> String {
        let name = uuid::Uuid::new_v4().to_string();
        self.add_table(file, &name, "");
        name
    }

    pub fn table_id(&self, name: &str) -> Result<TableId> {
        self.tables
            .read()
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
            .ok_or_else(|| StorageError::UnknownTableName(name.to_string()))
    }

    pub fn file(&self, id: TableId) -> Result<Arc<HeapFile>> {
        self.with_entry(id, |entry| Arc::clone(&entry.file))
    }

    pub fn tuple_desc(&self, id: TableId) -> Result<Arc<TupleDesc>> {
        self.with_entry(id, |entry| Arc::clone(entry.file.desc()))
    }

    pub fn table_name(&self, id: TableId) -> Result<String> {
        self.with_entry(id, |entry| entry.name.clone())
    }

    pub fn primary_key(&self, id: TableId) -> Result<String> {
        self.with_entry(id, |entry| entry.primary_key.clone())
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.tables.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        self.tables.write().clear();
    }

    /// Loads table definitions, one per line:
    ///
    /// ```text
    /// users (id int pk, name string)
    /// ```
    ///
    /// Each table is stored in `<name>.dat` next to the schema file.
    pub fn load_schema(&self, path: &Path) -> Result<Vec<TableId>> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let text = std::fs::read_to_string(path)?;

        let mut loaded = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (name, desc, primary_key) = parse_table_line(line)?;
            let file = Arc::new(HeapFile::open(&base.join(format!("{name}.dat")), Arc::new(desc))?);
            info!("added table {} with schema {}", name, file.desc());
            loaded.push(file.id());
            self.add_table(file, &name, &primary_key);
        }
        Ok(loaded)
    }

    fn with_entry<T>(&self, id: TableId, f: impl FnOnce(&TableEntry) -> T) -> Result<T> {
        self.tables
            .read()
            .get(&id)
            .map(f)
            .ok_or(StorageError::UnknownTable(id))
    }
}

fn parse_table_line(line: &str) -> Result<(String, TupleDesc, String)> {
    let invalid = || StorageError::InvalidSchema(line.to_string());

    let open = line.find('(').ok_or_else(invalid)?;
    let close = line.rfind(')').filter(|&c| c > open).ok_or_else(invalid)?;
    let name = line[..open].trim();
    if name.is_empty() {
        return Err(invalid());
    }

    let mut fields = Vec::new();
    let mut primary_key = String::new();
    for column in line[open + 1..close].split(',') {
        let parts: Vec<_> = column.split_whitespace().collect();
        let (field, ty) = match parts.as_slice() {
            [field, ty] | [field, ty, _] => (*field, *ty),
            _ => return Err(invalid()),
        };

        let data_type = match ty.to_ascii_lowercase().as_str() {
            "int" => DataType::Integer,
            "string" => DataType::char(),
            other => {
                return Err(StorageError::InvalidSchema(format!(
                    "unknown type '{other}' in: {line}"
                )))
            }
        };

        if let [_, _, annotation] = parts.as_slice() {
            if *annotation != "pk" {
                return Err(StorageError::InvalidSchema(format!(
                    "unknown annotation '{annotation}' in: {line}"
                )));
            }
            primary_key = field.to_string();
        }

        fields.push(FieldDef::new(data_type, Some(field.to_string())));
    }

    Ok((name.to_string(), TupleDesc::new(fields), primary_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn open(dir: &TempDir, name: &str) -> Arc<HeapFile> {
        let desc = Arc::new(TupleDesc::from_types([DataType::Integer]));
        Arc::new(HeapFile::open(&dir.path().join(name), desc).unwrap())
    }

    #[test]
    fn test_add_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let file = open(&dir, "a.dat");
        catalog.add_table(file.clone(), "a", "id");

        assert_eq!(catalog.table_id("a").unwrap(), file.id());
        assert_eq!(catalog.table_name(file.id()).unwrap(), "a");
        assert_eq!(catalog.primary_key(file.id()).unwrap(), "id");
        assert_eq!(*catalog.tuple_desc(file.id()).unwrap(), **file.desc());
        assert!(Arc::ptr_eq(&catalog.file(file.id()).unwrap(), &file));
    }

    #[test]
    fn test_unknown_lookups_fail() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.table_id("nope"),
            Err(StorageError::UnknownTableName(_))
        ));
        assert!(matches!(
            catalog.file(TableId(3)),
            Err(StorageError::UnknownTable(TableId(3)))
        ));
    }

    #[test]
    fn test_name_conflict_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let (a, b) = (open(&dir, "a.dat"), open(&dir, "b.dat"));

        catalog.add_table(a.clone(), "t", "");
        catalog.add_table(b.clone(), "t", "");
        assert_eq!(catalog.table_id("t").unwrap(), b.id());
        assert_eq!(catalog.table_ids(), vec![b.id()]);

        // Re-adding renames rather than duplicating.
        catalog.add_table(b.clone(), "renamed", "");
        assert_eq!(catalog.table_ids().len(), 1);
        assert!(catalog.table_id("t").is_err());
    }

    #[test]
    fn test_unnamed_tables_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new();
        let first = catalog.add_unnamed_table(open(&dir, "a.dat"));
        let second = catalog.add_unnamed_table(open(&dir, "b.dat"));
        assert_ne!(first, second);
        assert_eq!(catalog.table_ids().len(), 2);

        catalog.clear();
        assert!(catalog.table_ids().is_empty());
    }

    #[test]
    fn test_load_schema() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("catalog.txt");
        std::fs::write(
            &schema,
            "users (id int pk, name string)\n\norders (id int, user_id int)\n",
        )
        .unwrap();

        let catalog = Catalog::new();
        let ids = catalog.load_schema(&schema).unwrap();
        assert_eq!(ids.len(), 2);

        let users = catalog.table_id("users").unwrap();
        let desc = catalog.tuple_desc(users).unwrap();
        assert_eq!(desc.field_type(1), Some(DataType::char()));
        assert_eq!(desc.field_name(0), Some("id"));
        assert_eq!(catalog.primary_key(users).unwrap(), "id");
        assert!(dir.path().join("orders.dat").exists());
    }

    #[test]
    fn test_load_schema_rejects_bad_lines() {
        for line in ["users id int", "users (id float)", "users (id int key)", "(id int)"] {
            let dir = tempfile::tempdir().unwrap();
            let schema = dir.path().join("catalog.txt");
            std::fs::write(&schema, line).unwrap();
            assert!(
                matches!(
                    Catalog::new().load_schema(&schema),
                    Err(StorageError::InvalidSchema(_))
                ),
                "accepted: {line}"
            );
        }
    }
}
