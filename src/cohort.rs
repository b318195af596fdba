use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::AttritionConfig;
use crate::model::{CohortAssignment, EnrollmentRecord, StudentId};

/// Cohort of every student with a valid entry year at the home institution.
#[derive(Debug, Clone, Default)]
pub struct CohortTable {
    assignments: BTreeMap<StudentId, CohortAssignment>,
    excluded_students: usize,
}

impl CohortTable {
    pub fn get(&self, student: StudentId) -> Option<&CohortAssignment> {
        self.assignments.get(&student)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CohortAssignment> {
        self.assignments.values()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn cohorts(&self) -> BTreeSet<i32> {
        self.assignments.values().map(|a| a.cohort).collect()
    }

    /// Students seen at the home institution whose entry year was missing,
    /// a sentinel, or outside the cohort bounds on every record.
    pub fn excluded_students(&self) -> usize {
        self.excluded_students
    }
}

/// Assign each home-institution student to their earliest valid entry year.
///
/// `cohort_filter` keeps one cohort and is applied after the minimum is
/// taken, so a re-entering student never moves to a later cohort.
pub fn assign_cohorts(
    records: &[EnrollmentRecord],
    config: &AttritionConfig,
    cohort_filter: Option<i32>,
) -> CohortTable {
    let mut entry: BTreeMap<StudentId, &EnrollmentRecord> = BTreeMap::new();
    let mut invalid: BTreeSet<StudentId> = BTreeSet::new();

    for record in records {
        if record.institution_id != config.home_institution_id {
            continue;
        }
        let Some(year) = record
            .program_entry_year
            .filter(|y| config.is_valid_cohort_year(*y))
        else {
            invalid.insert(record.student_id);
            continue;
        };

        match entry.entry(record.student_id) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                let current = *slot.get();
                // Entry year is Some for every stored record.
                let current_key = (current.program_entry_year, current.period_year);
                let key = (Some(year), record.period_year);
                let fills_track = key == current_key
                    && current.schedule_track.is_none()
                    && record.schedule_track.is_some();
                if key < current_key || fills_track {
                    slot.insert(record);
                }
            }
        }
    }

    let excluded_students = invalid.iter().filter(|s| !entry.contains_key(s)).count();
    if excluded_students > 0 {
        tracing::debug!(excluded_students, "Students without a valid entry year");
    }

    let assignments = entry
        .into_iter()
        .filter_map(|(student_id, record)| {
            let cohort = record.program_entry_year?;
            if cohort_filter.is_some_and(|c| c != cohort) {
                return None;
            }
            Some((
                student_id,
                CohortAssignment {
                    student_id,
                    cohort,
                    schedule_track: record.schedule_track,
                    program_name: record.program_name.clone(),
                },
            ))
        })
        .collect();

    CohortTable {
        assignments,
        excluded_students,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduleTrack;

    fn home(student: i64, period: i32, entry: i32) -> EnrollmentRecord {
        EnrollmentRecord::new(StudentId(student), period, 104).with_entry_year(entry)
    }

    #[test]
    fn cohort_is_the_earliest_entry_year() {
        let records = vec![
            home(1, 2012, 2012).with_program("Ingeniería Comercial"),
            home(1, 2010, 2010).with_program("Contador Auditor"),
            home(1, 2011, 2010),
        ];
        let table = assign_cohorts(&records, &AttritionConfig::default(), None);

        let a = table.get(StudentId(1)).unwrap();
        assert_eq!(a.cohort, 2010);
        assert_eq!(a.program_name.as_deref(), Some("Contador Auditor"));
    }

    #[test]
    fn sentinel_and_out_of_bounds_entry_years_never_form_a_cohort() {
        let records = vec![
            home(1, 2015, 1900),
            home(2, 2015, 9999),
            home(3, 2004, 2004),
            EnrollmentRecord::new(StudentId(4), 2015, 104),
            home(5, 2015, 2015),
        ];
        let table = assign_cohorts(&records, &AttritionConfig::default(), None);

        assert_eq!(table.len(), 1);
        assert!(table.get(StudentId(5)).is_some());
        assert_eq!(table.excluded_students(), 4);
    }

    #[test]
    fn a_valid_record_rescues_a_student_with_sentinel_rows() {
        let records = vec![home(1, 2015, 9999), home(1, 2016, 2015)];
        let table = assign_cohorts(&records, &AttritionConfig::default(), None);
        assert_eq!(table.get(StudentId(1)).unwrap().cohort, 2015);
        assert_eq!(table.excluded_students(), 0);
    }

    #[test]
    fn filter_applies_after_the_minimum() {
        let records = vec![home(1, 2010, 2010), home(1, 2012, 2012), home(2, 2012, 2012)];
        let table = assign_cohorts(&records, &AttritionConfig::default(), Some(2012));

        assert!(table.get(StudentId(1)).is_none());
        assert_eq!(table.get(StudentId(2)).unwrap().cohort, 2012);
        assert_eq!(table.cohorts(), BTreeSet::from([2012]));
    }

    #[test]
    fn track_at_entry_prefers_a_populated_record() {
        let records = vec![
            home(1, 2015, 2015),
            home(1, 2015, 2015).with_track(ScheduleTrack::Evening),
            home(1, 2016, 2015).with_track(ScheduleTrack::Day),
        ];
        let table = assign_cohorts(&records, &AttritionConfig::default(), None);
        assert_eq!(
            table.get(StudentId(1)).unwrap().schedule_track,
            Some(ScheduleTrack::Evening)
        );
    }

    #[test]
    fn other_institutions_are_ignored() {
        let records = vec![EnrollmentRecord::new(StudentId(1), 2015, 200).with_entry_year(2015)];
        let table = assign_cohorts(&records, &AttritionConfig::default(), None);
        assert!(table.is_empty());
        assert_eq!(table.excluded_students(), 0);
    }
}
