//! JSON dataset files.
//!
//! A small columnar text format, mostly useful for tests and for poking at
//! the query engine from the command line:
//!
//! ```text
//! {
//!   "objects": [
//!     {"tree": {"name": "events", "branches": [
//!       {"name": "run", "type": "int32", "values": [1, 1, 2]},
//!       {"name": "energy", "type": "float64", "values": [1.5, 2.5, 3.5]}
//!     ]}},
//!     {"other": {"name": "h1", "class": "TH1F"}}
//!   ]
//! }
//! ```
use std::path::Path;
use std::sync::Arc;

use half::f16;
use serde::Deserialize;
use tracing::debug;

use crate::dataset::{Dataset, DatasetOpener};
use crate::datatype::DataType;
use crate::errors::{Result, StoreError, invalid_data};
use crate::memory::{MemoryColumn, MemoryDataset, MemoryTree};
use crate::scalar::ScalarValue;

#[derive(Debug, Deserialize)]
struct DatasetFile {
    objects: Vec<ObjectSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ObjectSpec {
    Tree(TreeSpec),
    Other(OtherSpec),
}

#[derive(Debug, Deserialize)]
struct TreeSpec {
    name: String,
    branches: Vec<BranchSpec>,
}

#[derive(Debug, Deserialize)]
struct BranchSpec {
    name: String,
    #[serde(rename = "type")]
    datatype: DataType,
    values: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OtherSpec {
    name: String,
    class: String,
}

/// Parse a JSON dataset document, naming the resulting dataset `name`.
pub fn dataset_from_json_str(name: &str, json: &str) -> Result<MemoryDataset> {
    let file: DatasetFile = serde_json::from_str(json)?;

    let mut dataset = MemoryDataset::new(name);
    for object in file.objects {
        dataset = match object {
            ObjectSpec::Tree(spec) => {
                let columns = spec
                    .branches
                    .into_iter()
                    .map(|b| {
                        let values = b
                            .values
                            .iter()
                            .map(|v| scalar_from_json(b.datatype, v))
                            .collect::<Result<Vec<_>>>()
                            .map_err(|e| {
                                invalid_data!("branch {:?} of tree {:?}: {e}", b.name, spec.name)
                            })?;
                        Ok(MemoryColumn::new(b.name, b.datatype, values))
                    })
                    .collect::<Result<Vec<_>>>()?;
                dataset.with_tree(Arc::new(MemoryTree::try_new(spec.name, columns)?))
            }
            ObjectSpec::Other(spec) => dataset.with_object(spec.name, spec.class),
        };
    }

    Ok(dataset)
}

fn scalar_from_json(datatype: DataType, value: &serde_json::Value) -> Result<ScalarValue> {
    let mismatch = || invalid_data!("cannot read {value} as {datatype}");

    let int = || value.as_i64().ok_or_else(mismatch);
    let uint = || value.as_u64().ok_or_else(mismatch);
    let float = || value.as_f64().ok_or_else(mismatch);

    Ok(match datatype {
        DataType::Boolean => ScalarValue::Boolean(value.as_bool().ok_or_else(mismatch)?),
        DataType::Int8 => ScalarValue::Int8(int()?.try_into().map_err(|_| mismatch())?),
        DataType::Int16 => ScalarValue::Int16(int()?.try_into().map_err(|_| mismatch())?),
        DataType::Int32 => ScalarValue::Int32(int()?.try_into().map_err(|_| mismatch())?),
        DataType::Int64 => ScalarValue::Int64(int()?),
        DataType::UInt8 => ScalarValue::UInt8(uint()?.try_into().map_err(|_| mismatch())?),
        DataType::UInt16 => ScalarValue::UInt16(uint()?.try_into().map_err(|_| mismatch())?),
        DataType::UInt32 => ScalarValue::UInt32(uint()?.try_into().map_err(|_| mismatch())?),
        DataType::UInt64 => ScalarValue::UInt64(uint()?),
        DataType::Float16 => ScalarValue::Float16(f16::from_f64(float()?)),
        DataType::Float32 => ScalarValue::Float32(float()? as f32),
        DataType::Float64 => ScalarValue::Float64(float()?),
        DataType::Utf8 => ScalarValue::Utf8(value.as_str().ok_or_else(mismatch)?.to_string()),
        DataType::Binary => {
            let bytes = value
                .as_array()
                .ok_or_else(mismatch)?
                .iter()
                .map(|b| {
                    b.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(mismatch)
                })
                .collect::<Result<Vec<_>>>()?;
            ScalarValue::Binary(bytes)
        }
    })
}

/// Opens JSON dataset files by path.
///
/// The dataset is named by the path exactly as given.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileOpener;

impl DatasetOpener for FileOpener {
    fn open(&self, name: &str) -> Result<Arc<dyn Dataset>> {
        let path = Path::new(name);
        if !path.is_file() {
            return Err(StoreError::UnknownDataset(name.to_string()));
        }
        let json = std::fs::read_to_string(path)?;
        let dataset = dataset_from_json_str(name, &json)?;
        debug!(%name, keys = ?dataset.keys(), "opened dataset file");
        Ok(Arc::new(dataset))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::dataset::DatasetObject;

    const DOC: &str = r#"{
        "objects": [
            {"tree": {"name": "events", "branches": [
                {"name": "run", "type": "int32", "values": [1, 1, 2]},
                {"name": "energy", "type": "float32", "values": [1.5, 2.5, 3.5]},
                {"name": "tag", "type": "string", "values": ["x", "y", "z"]}
            ]}},
            {"other": {"name": "h1", "class": "TH1F"}}
        ]
    }"#;

    #[test]
    fn parse_document() {
        let ds = dataset_from_json_str("doc", DOC).unwrap();
        assert_eq!(vec!["events".to_string(), "h1".to_string()], ds.keys());

        let tree = ds.get("events").unwrap().try_into_tree().unwrap();
        assert_eq!(3, tree.entries());
        assert_eq!(DataType::Float32, tree.branch("energy").unwrap().datatype);

        match ds.get("h1").unwrap() {
            DatasetObject::Other { class, .. } => assert_eq!("TH1F", class),
            other => panic!("unexpected object: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_value() {
        let doc = r#"{"objects": [{"tree": {"name": "t", "branches": [
            {"name": "a", "type": "uint8", "values": [256]}
        ]}}]}"#;
        let err = dataset_from_json_str("doc", doc).unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[test]
    fn binary_values() {
        let v = scalar_from_json(DataType::Binary, &serde_json::json!([0, 255])).unwrap();
        assert_eq!(ScalarValue::Binary(vec![0, 255]), v);
    }

    #[test]
    fn file_opener() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOC.as_bytes()).unwrap();
        let name = file.path().to_str().unwrap().to_string();

        let ds = FileOpener.open(&name).unwrap();
        assert_eq!(name, ds.name());
        assert!(ds.get("events").is_ok());

        let err = FileOpener.open("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, StoreError::UnknownDataset(_)));
    }
}
