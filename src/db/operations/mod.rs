pub mod attempts;
pub mod mastery;

pub use attempts::{
    close_attempt, entities_with_evidence, get_attempt, insert_attempt, is_update_applied,
    mark_attempt_scored, recent_outcomes, record_update_applied, AttemptClosure, OutcomeSample,
};
pub use mastery::{
    get_mastery_record, insert_mastery_record, list_mastery_records, upsert_status,
    write_mastery_record,
};
