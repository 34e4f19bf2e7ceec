use std::fs;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tempdir::TempDir;

use voltammetry::params::{Param, ParamTable, PARAM_COUNT};
use voltammetry::parsers::{import_dataset, parser_for};
use voltammetry::store::{ChangeSet, InMemoryStore, ObjectStore, UserId};
use voltammetry::Error;

fn write_volt(path: &Path, names: &[&str], points: usize) {
    let mut params = ParamTable::default();
    params[Param::Ptnr] = i32::try_from(points).unwrap();
    params[Param::DateYear] = 2024;
    params[Param::DateMonth] = 3;
    params[Param::DateDay] = 14;
    params[Param::DateHour] = 9;

    let mut out = vec![];
    out.write_u16::<LittleEndian>(1).unwrap();
    out.write_u16::<LittleEndian>(u16::try_from(names.len()).unwrap()).unwrap();
    for (n, name) in names.iter().enumerate() {
        let mut block = vec![];
        block.extend_from_slice(name.as_bytes());
        block.push(0);
        block.write_u16::<LittleEndian>(0).unwrap();
        assert_eq!(params.as_slice().len(), PARAM_COUNT);
        for value in params.as_slice() {
            block.write_i32::<LittleEndian>(*value).unwrap();
        }
        for i in 0..points {
            #[allow(clippy::cast_precision_loss)]
            let i = i as f64;
            block.write_f64::<LittleEndian>(20.0 * i).unwrap();
            block.write_f64::<LittleEndian>(5.0f64.mul_add(i, -500.0)).unwrap();
            #[allow(clippy::cast_precision_loss)]
            block.write_f64::<LittleEndian>(i + n as f64).unwrap();
        }
        out.write_u32::<LittleEndian>(u32::try_from(block.len()).unwrap()).unwrap();
        out.extend_from_slice(&block);
    }
    fs::write(path, out).unwrap();
}

fn import(path: &Path) -> Result<(InMemoryStore, ChangeSet, voltammetry::store::DatasetId), Error> {
    let store = InMemoryStore::new();
    let bytes = fs::read(path).unwrap();
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let file_name = path.file_name().and_then(|e| e.to_str()).unwrap_or_default();
    let mut changes = ChangeSet::default();
    let dataset = import_dataset(&store, &bytes, extension, UserId(7), file_name, &mut changes)?;
    Ok((store, changes, dataset))
}

#[test]
fn volt_files_become_a_dataset() {
    let dir = TempDir::new("volt_import").unwrap();
    let path = dir.path().join("Pb in tap water.volt");
    write_volt(&path, &["blank", "add 1", "add 2"], 25);

    let (store, changes, id) = import(&path).unwrap();
    store.commit(changes).unwrap();
    let dataset = store.dataset(id).unwrap();

    assert_eq!(dataset.name, "Pb in tap water.volt");
    assert_eq!(dataset.members().len(), 3);
    for member in dataset.members() {
        let data = store.curve_data(*member).unwrap();
        assert_eq!(data.len(), 25);
        assert_eq!(data.owner, UserId(7));
        let curve = store.curve(data.curve).unwrap();
        assert_eq!(curve.file_name, "Pb in tap water.volt");
        assert!(curve.date.is_some());
    }
    let last = store.curve_data(dataset.members()[2]).unwrap();
    assert_eq!(last.current()[0], 2.0);
    assert_eq!(last.potential()[24], -380.0);
}

#[test]
fn csv_files_become_a_dataset() {
    let dir = TempDir::new("csv_import").unwrap();
    let path = dir.path().join("export.csv");
    fs::write(&path, "-500,0.1,0.2\n-495,0.3,0.4\n-490,0.5,0.6\n").unwrap();

    let (store, changes, id) = import(&path).unwrap();
    store.commit(changes).unwrap();
    let dataset = store.dataset(id).unwrap();
    assert_eq!(dataset.members().len(), 2);
    let second = store.curve_data(dataset.members()[1]).unwrap();
    assert_eq!(second.current(), &[0.2, 0.4, 0.6]);
    assert_eq!(second.potential(), &[-500.0, -495.0, -490.0]);
}

#[test]
fn damaged_files_import_nothing() {
    let dir = TempDir::new("damaged_import").unwrap();
    let path = dir.path().join("damaged.volt");
    write_volt(&path, &["blank"], 10);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    assert!(matches!(import(&path), Err(Error::Parse(_))));
    assert!(matches!(parser_for("docx"), Err(Error::Parse(_))));
}
