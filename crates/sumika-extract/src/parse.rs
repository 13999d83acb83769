//! Field parsers for the portal's display formats.

use regex::Regex;
use std::sync::OnceLock;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex literal"))
}

/// "8.3万円" -> 83000, "120,000円" -> 120000, "9万円" -> 90000.
pub(crate) fn parse_rent_yen(text: &str) -> Option<i64> {
    static MAN: OnceLock<Regex> = OnceLock::new();
    static PLAIN: OnceLock<Regex> = OnceLock::new();

    let cleaned = text.replace(',', "");
    if let Some(caps) = re(&MAN, r"([0-9]+(?:\.[0-9]+)?)\s*万円").captures(&cleaned) {
        let man: f64 = caps.get(1)?.as_str().parse().ok()?;
        return Some((man * 10_000.0).round() as i64);
    }
    if let Some(caps) = re(&PLAIN, r"([0-9]+)\s*円").captures(&cleaned) {
        return caps.get(1)?.as_str().parse().ok();
    }
    None
}

/// "山手線「目黒」駅 徒歩5分" -> 5.
pub(crate) fn parse_walk_minutes(text: &str) -> Option<i32> {
    static WALK: OnceLock<Regex> = OnceLock::new();
    let caps = re(&WALK, r"徒歩\s*([0-9]+)\s*分").captures(text)?;
    caps.get(1)?.as_str().parse().ok()
}

/// "25.5m2" / "25.5㎡" -> 25.5.
pub(crate) fn parse_area_sqm(text: &str) -> Option<f64> {
    static AREA: OnceLock<Regex> = OnceLock::new();
    let caps = re(&AREA, r"([0-9]+(?:\.[0-9]+)?)\s*(?:m2|m²|㎡)").captures(text)?;
    caps.get(1)?.as_str().parse().ok()
}

/// "築10年" -> 10, "新築" -> 0.
pub(crate) fn parse_building_age(text: &str) -> Option<i32> {
    static AGE: OnceLock<Regex> = OnceLock::new();
    if text.contains("新築") {
        return Some(0);
    }
    let caps = re(&AGE, r"築\s*([0-9]+)\s*年").captures(text)?;
    caps.get(1)?.as_str().parse().ok()
}
