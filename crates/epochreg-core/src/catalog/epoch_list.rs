use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{EpochRegError, Result};
use crate::exposure::{Camera, Exposure};

const COLUMNS: [&str; 10] = [
    "filename", "rootname", "filter", "camera", "pidvisit", "mjd", "epoch", "ontarget",
    "fevgroup", "fegroup",
];

/// Write the exposure table, one row per exposure.
pub fn persist(exposures: &[Exposure], path: &Path) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(
        out,
        "# {:<26} {:<10} {:<6} {:<10} {:<12} {:>12} {:>5} {:>8} {:<26} {}",
        COLUMNS[0],
        COLUMNS[1],
        COLUMNS[2],
        COLUMNS[3],
        COLUMNS[4],
        COLUMNS[5],
        COLUMNS[6],
        COLUMNS[7],
        COLUMNS[8],
        COLUMNS[9],
    )?;
    for e in exposures {
        writeln!(
            out,
            "{:<28} {:<10} {:<6} {:<10} {:<12} {:>12.6} {:>5} {:>8} {:<26} {}",
            e.filename,
            e.rootname,
            e.filter,
            e.camera.tag().replace(char::is_whitespace, "_"),
            e.pidvisit,
            e.mjd,
            e.epoch,
            u8::from(e.on_target),
            e.fev_group(),
            e.fe_group(),
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Read a persisted exposure table. Exposure paths are resolved against
/// `input_dir`. Rows whose stored group keys disagree with the ones derived
/// from their fields are rejected.
pub fn load(path: &Path, input_dir: &Path) -> Result<Vec<Exposure>> {
    let text = fs::read_to_string(path)?;
    let mut exposures = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let bad = |reason: String| EpochRegError::EpochList {
            path: path.to_path_buf(),
            line: line_no,
            reason,
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != COLUMNS.len() {
            return Err(bad(format!(
                "expected {} columns, found {}",
                COLUMNS.len(),
                fields.len()
            )));
        }
        let mjd: f64 = fields[5]
            .parse()
            .map_err(|_| bad(format!("bad mjd '{}'", fields[5])))?;
        let epoch: i32 = fields[6]
            .parse()
            .map_err(|_| bad(format!("bad epoch '{}'", fields[6])))?;
        let on_target = match fields[7] {
            "1" | "T" | "true" => true,
            "0" | "F" | "false" => false,
            other => return Err(bad(format!("bad on-target flag '{other}'"))),
        };
        let camera = fields[3].parse::<Camera>().unwrap_or_else(|never| match never {});

        let exposure = Exposure {
            filename: fields[0].to_string(),
            path: input_dir.join(fields[0]),
            rootname: fields[1].to_string(),
            filter: fields[2].to_string(),
            camera,
            mjd,
            pidvisit: fields[4].to_string(),
            on_target,
            epoch,
        };

        let fev = exposure.fev_group().to_string();
        if fev != fields[8] {
            return Err(bad(format!(
                "stored group {} does not match derived {fev}",
                fields[8]
            )));
        }
        let fe = exposure.fe_group().to_string();
        if fe != fields[9] {
            return Err(bad(format!(
                "stored group {} does not match derived {fe}",
                fields[9]
            )));
        }
        exposures.push(exposure);
    }
    Ok(exposures)
}
