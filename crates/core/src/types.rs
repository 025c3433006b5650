/// Row ids, and the LMS's numeric ids for courses, users, groups and
/// activity instances, are all 64-bit.
pub type DbId = i64;

/// Timestamps are UTC; local time only matters when an EC deadline keeps
/// the original time of day.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
