/// Render the episode span of a season group, e.g. `S5 E3-5`.
///
/// Numbers are sorted and de-duplicated for display only.
pub fn format_subtitle(season: u32, episodes: &[u32]) -> String {
    let mut sorted = episodes.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    match sorted.as_slice() {
        [] => format!("S{}", season),
        [only] => format!("S{} E{}", season, only),
        [first, .., last] if sorted.windows(2).all(|pair| pair[1] == pair[0] + 1) => {
            format!("S{} E{}-{}", season, first, last)
        }
        _ => {
            let list: Vec<String> = sorted.iter().map(|n| n.to_string()).collect();
            format!("S{} E{}", season, list.join(","))
        }
    }
}
