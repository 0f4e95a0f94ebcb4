/// Output file stems for a job producing `n` images.
///
/// A single image keeps the bare stem. Several images get a 1-based suffix padded to the
/// decimal width of `n`, so `n = 12` yields `stem_01` .. `stem_12`.
pub fn output_stems(stem: &str, n: u32) -> Vec<String> {
    if n <= 1 {
        return vec![stem.to_string()];
    }
    let width = n.to_string().len();
    (1..=n)
        .map(|idx| format!("{stem}_{idx:0width$}"))
        .collect()
}

pub fn with_extension(stem: &str, ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.');
    if ext.is_empty() {
        return stem.to_string();
    }
    format!("{stem}.{ext}")
}
