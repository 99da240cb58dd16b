pub mod media;
pub mod watch_event;
pub mod grouped;
pub mod calendar;
pub mod rating;
pub mod display;
pub mod playlist;

pub use media::{MovieRef, ShowRef};
pub use watch_event::WatchEvent;
pub use grouped::{GroupedRecord, SeasonGroup};
pub use calendar::{CalendarEpisode, CalendarGroup, CalendarMovie, EpisodeType, RawCalendar};
pub use rating::{RatingIndex, SeasonIndex, SeasonMetadata};
pub use display::{CalendarItem, DisplayItem, FeedDocument, ItemType, WatchStats};
pub use playlist::{
    AudioFeatures, DiffOp, LikedPage, PlaylistContents, PlaylistState, PlaylistSummary, TrackMetadata,
};
