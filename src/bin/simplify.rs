/// SunSpec Schema Simplifier
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Strips documentation-only meta fields (labels, descriptions, notes,
/// comments) from a SunSpec model schema, leaving the minimal structural
/// document.
///
/// Usage:
///   simplify -i models.json        read the schema from a file
///   simplify < models.json         read the schema from stdin
use std::io::Read;

use voltage_sunspec::ModelDef;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let input = match args.iter().position(|a| a == "-i") {
        Some(pos) => {
            let path = args.get(pos + 1).ok_or("missing file after -i")?;
            std::fs::read_to_string(path)?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let mut schema: Vec<ModelDef> = serde_json::from_str(&input)?;
    for model in &mut schema {
        model.simplify();
    }

    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
