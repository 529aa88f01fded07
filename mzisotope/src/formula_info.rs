use mzisotope::api::RequestParseError;
use mzisotope::{
    evaluate, FormulaParser, IsotopeTable, IsotopicPatternError, PatternReport, ReportParams,
};
use std::env;

fn main() -> Result<(), IsotopicPatternError> {
    let mut args = env::args().skip(1);
    let table = IsotopeTable::bundled();
    let text = args
        .next()
        .inspect(|s| eprintln!("formula: {s}"))
        .unwrap_or_default();
    let charge = match args.next() {
        Some(s) => {
            eprintln!("z: {s}");
            s.trim()
                .parse::<i32>()
                .map_err(|e| RequestParseError::MalformedCharge(s.clone(), e))?
        }
        None => 0,
    };

    let formula = FormulaParser::new(table).parse(&text)?;
    println!("{}", table.format_formula(&formula));
    if let Some(mass) = table.monoisotopic_mass(&formula) {
        println!("monoisotopic mass: {mass:.6}");
    }
    if let Some(mass) = table.most_abundant_mass(&formula) {
        println!("most abundant mass: {mass:.6}");
    }

    let pattern = evaluate(&formula, table, 1e-10, charge)?;
    if let Some(mass) = pattern.average_mass() {
        println!("average m/z: {mass:.6}");
    }
    let report = PatternReport::new(text, charge, 1e-10, &pattern, &ReportParams::new(5, 0.01));
    for peak in report.peaks.iter() {
        println!("{:.5}\t{:.5}\t{}", peak.mass, peak.relative_intensity, charge);
    }
    Ok(())
}
