use feed_sync_models::{CalendarEpisode, CalendarGroup};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Group upcoming episodes by (air day, show slug, season).
///
/// Input order does not matter. On collision the episode number is appended
/// and the stored episode type only moves up the rank order.
pub fn group_calendar(episodes: &[CalendarEpisode]) -> Vec<CalendarGroup> {
    let mut groups: BTreeMap<_, CalendarGroup> = BTreeMap::new();

    for episode in episodes {
        let air_date = episode.first_aired.date_naive();
        let key = (air_date, episode.show.slug.clone(), episode.season);
        match groups.entry(key) {
            Entry::Occupied(mut entry) => {
                let group = entry.get_mut();
                group.episodes.push(episode.number);
                if episode.episode_type > group.episode_type {
                    group.episode_type = episode.episode_type;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(CalendarGroup {
                    air_date,
                    show: episode.show.clone(),
                    season: episode.season,
                    episodes: vec![episode.number],
                    episode_type: episode.episode_type,
                });
            }
        }
    }

    groups.into_values().collect()
}
