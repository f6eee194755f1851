use std::collections::HashMap;

/// Get a parameter value with a default fallback
pub fn get_param(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Get a parameter rounded to an i32
pub fn get_rounded_param(params: &HashMap<String, f64>, key: &str, default: i32) -> i32 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i32)
        .unwrap_or(default)
}

/// Get a parameter as usize with a minimum value
pub fn get_usize_param_min(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or(default)
}

/// Interpret a parameter as a flag (>= 0.5 is on)
pub fn get_flag_param(params: &HashMap<String, f64>, key: &str, default: bool) -> bool {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v >= 0.5)
        .unwrap_or(default)
}

/// Stable textual key for a parameter map, used to dedupe variations.
pub fn parameter_signature(parameters: &HashMap<String, f64>) -> String {
    let mut sorted: Vec<_> = parameters.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    format!("{:?}", sorted)
}
