//! Progress state machine
//!
//! Pure transition planning for the two mutation entry points. Both take the
//! latest record of a `(task_id, user_id)` pair as the authoritative current
//! state and return the values of the row to append, or a rejection.
//!
//! **Student update**
//! - caller must be the assigned Mahasiswa
//! - `progress <= 0` → Pending/0, `>= 100` rejected, otherwise In-Progress
//! - an explicit status override keeps the current progress and status
//! - progress never moves backwards
//!
//! **Lecturer review**
//! - caller must be the Dosen who created the task
//! - `Revisi` needs a comment, forbids a grade, keeps progress
//! - `Done` forces progress 100 and may carry a grade in `[0, 100]`
//! - neither is allowed once the current status is Done

use std::str::FromStr;

use tasktrack_common::api::{Principal, Role};
use tasktrack_common::events::ProgressStatus;

use crate::db::ProgressRecord;
use crate::error::{ProgressError, ProgressResult};

/// Student-submitted fields, already parsed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentUpdate {
    pub progress: Option<i64>,
    pub description: Option<String>,
    /// Raw `status` form field; its presence disables progress computation
    pub status_override: Option<String>,
}

/// Reviewer action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Revisi,
    Done,
}

impl FromStr for ReviewAction {
    type Err = ProgressError;

    fn from_str(s: &str) -> ProgressResult<Self> {
        match s.trim() {
            "Revisi" => Ok(ReviewAction::Revisi),
            "Done" => Ok(ReviewAction::Done),
            _ => Err(ProgressError::validation(
                "Invalid action. Use 'Revisi' or 'Done'",
            )),
        }
    }
}

/// Lecturer-submitted fields, already parsed
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub action: ReviewAction,
    pub dosen_comment: Option<String>,
    pub grade: Option<i64>,
}

/// Values of the row a transition appends
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub progress: i64,
    pub status: ProgressStatus,
    pub dosen_comment: Option<String>,
    pub grade: Option<i64>,
}

/// Parse the optional `progress` form field
///
/// Blank means "not supplied"; anything else must be a whole number.
pub fn parse_progress(raw: Option<&str>) -> ProgressResult<Option<i64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ProgressError::validation("Progress must be a whole number")),
    }
}

/// Parse the optional `grade` form field: an integer in `[0, 100]`
pub fn parse_grade(raw: Option<&str>) -> ProgressResult<Option<i64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => match text.parse::<i64>() {
            Ok(grade) if (0..=100).contains(&grade) => Ok(Some(grade)),
            _ => Err(ProgressError::validation(
                "Grade must be a number between 0 and 100",
            )),
        },
    }
}

/// Plan a student update against `current`
pub fn plan_student_update(
    principal: &Principal,
    current: &ProgressRecord,
    update: &StudentUpdate,
) -> ProgressResult<Transition> {
    let assignee = current.assigned_to.unwrap_or(current.user_id);
    if !principal.is(Role::Mahasiswa) || principal.id != assignee {
        return Err(ProgressError::Forbidden(
            "You are not allowed to update this progress".to_string(),
        ));
    }

    let (progress, status) = match (update.progress, &update.status_override) {
        (Some(p), None) if p <= 0 => (0, ProgressStatus::Pending),
        (Some(p), None) if p >= 100 => {
            return Err(ProgressError::validation(
                "Progress 100% can only be given by the lecturer when reviewing",
            ))
        }
        (Some(p), None) => (p, ProgressStatus::InProgress),
        _ => (current.progress, current.status),
    };

    if progress < current.progress {
        return Err(ProgressError::regress(current.progress));
    }

    Ok(Transition {
        progress,
        status,
        dosen_comment: None,
        grade: None,
    })
}

/// Plan a lecturer review against `current`
pub fn plan_review(
    principal: &Principal,
    current: &ProgressRecord,
    review: &Review,
) -> ProgressResult<Transition> {
    if !principal.is(Role::Dosen) {
        return Err(ProgressError::Forbidden(
            "Only lecturers can review progress".to_string(),
        ));
    }
    if current.created_by != Some(principal.id) {
        return Err(ProgressError::Forbidden(
            "You are not the creator of this task".to_string(),
        ));
    }

    let comment = review
        .dosen_comment
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    match review.action {
        ReviewAction::Revisi => {
            if comment.is_none() {
                return Err(ProgressError::validation(
                    "A comment is required when requesting a revision",
                ));
            }
            if review.grade.is_some() {
                return Err(ProgressError::validation(
                    "A grade cannot be given together with a revision",
                ));
            }
            if current.status.is_done() {
                return Err(ProgressError::validation(
                    "Progress is already Done and cannot be revised",
                ));
            }
            Ok(Transition {
                progress: current.progress,
                status: ProgressStatus::Revisi,
                dosen_comment: comment,
                grade: None,
            })
        }
        ReviewAction::Done => {
            if current.status.is_done() {
                return Err(ProgressError::validation(
                    "Task is already marked Done and cannot be changed",
                ));
            }
            Ok(Transition {
                progress: 100,
                status: ProgressStatus::Done,
                dosen_comment: comment,
                grade: review.grade,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tasktrack_common::events::TaskType;

    fn record(progress: i64, status: ProgressStatus) -> ProgressRecord {
        ProgressRecord {
            id: 1,
            task_id: 55,
            task_type: TaskType::Individual,
            group_id: None,
            user_id: 12,
            user_name: None,
            dosen_name: None,
            created_by: Some(3),
            assigned_to: Some(12),
            progress,
            status,
            description: None,
            document: None,
            storage_key: None,
            dosen_comment: None,
            grade: None,
            created_at: Utc::now(),
        }
    }

    fn student() -> Principal {
        Principal::new(12, Role::Mahasiswa)
    }

    fn lecturer() -> Principal {
        Principal::new(3, Role::Dosen)
    }

    fn update(progress: i64) -> StudentUpdate {
        StudentUpdate {
            progress: Some(progress),
            ..StudentUpdate::default()
        }
    }

    #[test]
    fn test_student_progress_rules() {
        let seed = record(0, ProgressStatus::Pending);

        let t = plan_student_update(&student(), &seed, &update(40)).unwrap();
        assert_eq!((t.progress, t.status), (40, ProgressStatus::InProgress));

        let t = plan_student_update(&student(), &seed, &update(-5)).unwrap();
        assert_eq!((t.progress, t.status), (0, ProgressStatus::Pending));

        let err = plan_student_update(&student(), &seed, &update(100)).unwrap_err();
        assert!(matches!(err, ProgressError::Validation { last_progress: None, .. }));
    }

    #[test]
    fn test_student_cannot_regress() {
        let current = record(40, ProgressStatus::InProgress);
        let err = plan_student_update(&student(), &current, &update(30)).unwrap_err();
        match err {
            ProgressError::Validation { last_progress, .. } => assert_eq!(last_progress, Some(40)),
            other => panic!("unexpected error: {:?}", other),
        }

        // Zero is a regress too once progress was made
        assert!(plan_student_update(&student(), &current, &update(0)).is_err());
        // Same value is allowed
        assert!(plan_student_update(&student(), &current, &update(40)).is_ok());
    }

    #[test]
    fn test_student_role_and_assignment() {
        let seed = record(0, ProgressStatus::Pending);
        let err = plan_student_update(&lecturer(), &seed, &update(10)).unwrap_err();
        assert!(matches!(err, ProgressError::Forbidden(_)));

        let other_student = Principal::new(13, Role::Mahasiswa);
        let err = plan_student_update(&other_student, &seed, &update(10)).unwrap_err();
        assert!(matches!(err, ProgressError::Forbidden(_)));
    }

    #[test]
    fn test_status_override_keeps_current_values() {
        let current = record(40, ProgressStatus::InProgress);
        let input = StudentUpdate {
            progress: Some(70),
            description: Some("draft".into()),
            status_override: Some("Done".into()),
        };
        let t = plan_student_update(&student(), &current, &input).unwrap();
        assert_eq!((t.progress, t.status), (40, ProgressStatus::InProgress));
    }

    #[test]
    fn test_description_only_keeps_state() {
        let current = record(40, ProgressStatus::Revisi);
        let input = StudentUpdate {
            description: Some("fixed".into()),
            ..StudentUpdate::default()
        };
        let t = plan_student_update(&student(), &current, &input).unwrap();
        assert_eq!((t.progress, t.status), (40, ProgressStatus::Revisi));
    }

    #[test]
    fn test_review_done_forces_full_progress() {
        let current = record(40, ProgressStatus::InProgress);
        let review = Review {
            action: ReviewAction::Done,
            dosen_comment: None,
            grade: Some(85),
        };
        let t = plan_review(&lecturer(), &current, &review).unwrap();
        assert_eq!(t.progress, 100);
        assert_eq!(t.status, ProgressStatus::Done);
        assert_eq!(t.grade, Some(85));
    }

    #[test]
    fn test_review_revisi_rules() {
        let current = record(40, ProgressStatus::InProgress);

        let no_comment = Review {
            action: ReviewAction::Revisi,
            dosen_comment: Some("   ".into()),
            grade: None,
        };
        assert!(plan_review(&lecturer(), &current, &no_comment).is_err());

        let with_grade = Review {
            action: ReviewAction::Revisi,
            dosen_comment: Some("fix intro".into()),
            grade: Some(70),
        };
        assert!(plan_review(&lecturer(), &current, &with_grade).is_err());

        let ok = Review {
            action: ReviewAction::Revisi,
            dosen_comment: Some("fix intro".into()),
            grade: None,
        };
        let t = plan_review(&lecturer(), &current, &ok).unwrap();
        assert_eq!((t.progress, t.status), (40, ProgressStatus::Revisi));
        assert_eq!(t.dosen_comment.as_deref(), Some("fix intro"));
    }

    #[test]
    fn test_review_rejected_after_done() {
        let current = record(100, ProgressStatus::Done);
        for action in [ReviewAction::Revisi, ReviewAction::Done] {
            let review = Review {
                action,
                dosen_comment: Some("again".into()),
                grade: None,
            };
            assert!(plan_review(&lecturer(), &current, &review).is_err());
        }
    }

    #[test]
    fn test_review_requires_task_creator() {
        let current = record(40, ProgressStatus::InProgress);
        let review = Review {
            action: ReviewAction::Done,
            dosen_comment: None,
            grade: None,
        };
        let stranger = Principal::new(4, Role::Dosen);
        assert!(matches!(
            plan_review(&stranger, &current, &review),
            Err(ProgressError::Forbidden(_))
        ));
        assert!(matches!(
            plan_review(&student(), &current, &review),
            Err(ProgressError::Forbidden(_))
        ));
    }

    #[test]
    fn test_form_parsing() {
        assert_eq!(parse_progress(None).unwrap(), None);
        assert_eq!(parse_progress(Some(" ")).unwrap(), None);
        assert_eq!(parse_progress(Some("40")).unwrap(), Some(40));
        assert!(parse_progress(Some("forty")).is_err());

        assert_eq!(parse_grade(Some("85")).unwrap(), Some(85));
        assert_eq!(parse_grade(Some("")).unwrap(), None);
        assert!(parse_grade(Some("85.5")).is_err());
        assert!(parse_grade(Some("A")).is_err());
        assert!(parse_grade(Some("101")).is_err());
        assert!(parse_grade(Some("-1")).is_err());

        assert_eq!("Done".parse::<ReviewAction>().unwrap(), ReviewAction::Done);
        assert!("Approve".parse::<ReviewAction>().is_err());
    }
}
