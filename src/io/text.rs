use crate::floating_type_mod::FT;
use crate::run::RunError;
use crate::storage::{Buffer, Storage};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Whitespace-separated text dump, one line per particle. Column layout is
/// whatever the writer selects; consumers must parse the header line
/// rather than rely on positions.
pub struct TextOutput {
    pub run_name: String,
}

fn column_names(label: &str, buffer: &Buffer, level: usize) -> Vec<String> {
    let suffix = match level {
        0 => String::new(),
        1 => "_dt".into(),
        _ => "_d2t".into(),
    };
    let lanes: &[&str] = match buffer {
        Buffer::Scalar(_) => &[""],
        Buffer::Vector(_) => &["_x", "_y", "_z", "_h"],
        Buffer::SymTensor(_) => &["_xx", "_yy", "_zz", "_xy", "_xz", "_yz"],
        Buffer::TracelessTensor(_) => &["_xx", "_yy", "_xy", "_xz", "_yz"],
        Buffer::Tensor(_) => &["_00", "_01", "_02", "_10", "_11", "_12", "_20", "_21", "_22"],
        Buffer::Index(_) => &[""],
    };
    lanes
        .iter()
        .map(|lane| format!("{}{}{}", label, suffix, lane))
        .collect()
}

fn row_values(buffer: &Buffer, i: usize) -> Vec<FT> {
    match buffer {
        Buffer::Scalar(v) => vec![v[i]],
        Buffer::Vector(v) => (0..4).map(|lane| v[i][lane]).collect(),
        Buffer::SymTensor(v) => vec![
            v[i].diag.x,
            v[i].diag.y,
            v[i].diag.z,
            v[i].off.x,
            v[i].off.y,
            v[i].off.z,
        ],
        Buffer::TracelessTensor(v) => vec![
            v[i].get(0, 0),
            v[i].get(1, 1),
            v[i].get(0, 1),
            v[i].get(0, 2),
            v[i].get(1, 2),
        ],
        Buffer::Tensor(v) => (0..3)
            .flat_map(|row| (0..3).map(move |col| v[i][(row, col)]))
            .collect(),
        Buffer::Index(v) => vec![v[i] as FT],
    }
}

impl TextOutput {
    pub fn save(&self, path: &Path, storage: &Storage, time: FT) -> Result<(), RunError> {
        let file = std::fs::File::create(path).map_err(|source| RunError::io(path, source))?;
        let mut out = BufWriter::new(file);
        self.write(&mut out, storage, time)
            .map_err(|source| RunError::io(path, source))
    }

    fn write(&self, out: &mut impl Write, storage: &Storage, time: FT) -> std::io::Result<()> {
        writeln!(out, "# run: {}  time: {}", self.run_name, time)?;

        let mut header = Vec::new();
        for (id, q) in storage.quantities() {
            let label = id.metadata().label;
            for level in 0..q.order().levels() {
                let buffer = q.buffer(level).unwrap();
                if !buffer.is_empty() {
                    header.extend(column_names(label, buffer, level));
                }
            }
        }
        writeln!(out, "# {}", header.join(" "))?;

        for i in 0..storage.particle_count() {
            let mut row = Vec::new();
            for (_, q) in storage.quantities() {
                for level in 0..q.order().levels() {
                    let buffer = q.buffer(level).unwrap();
                    if !buffer.is_empty() {
                        row.extend(row_values(buffer, i));
                    }
                }
            }
            let line: Vec<String> = row.iter().map(|x| format!("{:.9e}", x)).collect();
            writeln!(out, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Material, OrderEnum, QuantityId};
    use crate::vec4;

    #[test]
    fn header_matches_row_width() {
        let mut storage = Storage::with_material(Material::null());
        storage.insert(
            QuantityId::Position,
            OrderEnum::Second,
            vec![vec4(1., 2., 3., 0.1)],
        );
        storage.insert(QuantityId::Mass, OrderEnum::Zero, vec![2.]);

        let output = TextOutput {
            run_name: "text".into(),
        };
        let mut bytes = Vec::new();
        output.write(&mut bytes, &storage, 0.5).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("# run: text"));
        let header_cols = lines[1].trim_start_matches("# ").split_whitespace().count();
        let row_cols = lines[2].split_whitespace().count();
        assert_eq!(header_cols, row_cols);
        // 3 levels of 4-lane positions plus the mass
        assert_eq!(row_cols, 13);
    }
}
