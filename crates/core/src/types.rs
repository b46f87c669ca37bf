use crate::error::CoreError;

/// Job identifiers are random UUIDs, never reused within a process.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4()
}

/// Parse a client-supplied job id.
///
/// A malformed id cannot name any job, so it is reported as
/// [`CoreError::UnknownJob`] rather than a validation failure.
pub fn parse_job_id(raw: &str) -> Result<JobId, CoreError> {
    uuid::Uuid::parse_str(raw.trim()).map_err(|_| CoreError::UnknownJob(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_job_id(), new_job_id());
    }

    #[test]
    fn parse_accepts_hyphenated_uuid() {
        let id = new_job_id();
        assert_eq!(parse_job_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_rejects_garbage_as_unknown() {
        assert_matches!(parse_job_id("not-a-job"), Err(CoreError::UnknownJob(raw)) if raw == "not-a-job");
    }
}
