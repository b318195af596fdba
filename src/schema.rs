/// Column-name constants for the ecas-attrition feeds and output tables.
/// Single source of truth - exported to Python via PyO3.

// ── Enrollment feed (unified enrollment view) ───────────────────────────────
pub mod enrollment {
    pub const STUDENT_ID: &str = "mrun";
    pub const PERIOD_YEAR: &str = "cat_periodo";
    pub const INSTITUTION_ID: &str = "cod_inst";
    pub const INSTITUTION_NAME: &str = "nomb_inst";
    pub const PROGRAM_NAME: &str = "nomb_carrera";
    pub const KNOWLEDGE_AREA: &str = "area_conocimiento";
    pub const SCHEDULE_TRACK: &str = "jornada";
    pub const NOMINAL_DURATION: &str = "dur_total_carr";
    pub const PROGRAM_ENTRY_YEAR: &str = "anio_ing_carr_ori";
    pub const INSTITUTION_TIER_1: &str = "tipo_inst_1";
    pub const INSTITUTION_TIER_2: &str = "tipo_inst_2";
    pub const INSTITUTION_TIER_3: &str = "tipo_inst_3";
    pub const ADMISSION_REQUIREMENT: &str = "requisito_ingreso";
    pub const PROGRAM_LEVEL: &str = "nivel_global";

    pub const REQUIRED: [&str; 3] = [STUDENT_ID, PERIOD_YEAR, INSTITUTION_ID];

    pub const INTEGER: [&str; 5] = [
        STUDENT_ID,
        PERIOD_YEAR,
        INSTITUTION_ID,
        NOMINAL_DURATION,
        PROGRAM_ENTRY_YEAR,
    ];
}

// ── Graduation feed (unified graduates view) ────────────────────────────────
pub mod graduation {
    pub const STUDENT_ID: &str = "mrun";
    pub const PERIOD_YEAR: &str = "cat_periodo";
    pub const INSTITUTION_ID: &str = "cod_inst";
    pub const PROGRAM_NAME: &str = "nomb_carrera";
    pub const DEGREE_TITLE: &str = "nomb_titulo_obtenido";

    pub const REQUIRED: [&str; 3] = [STUDENT_ID, PERIOD_YEAR, INSTITUTION_ID];

    pub const INTEGER: [&str; 3] = [STUDENT_ID, PERIOD_YEAR, INSTITUTION_ID];
}

// ── Attrition population output ─────────────────────────────────────────────
pub mod attrition {
    pub const STUDENT_ID: &str = "student_id";
    pub const COHORT: &str = "cohort";
    pub const FIRST_ABSENCE_YEAR: &str = "first_absence_year";
    pub const LAST_HOME_YEAR: &str = "last_home_year";
    pub const SCHEDULE_TRACK: &str = "schedule_track";
    pub const CLASSIFICATION: &str = "classification";
    pub const GRADUATED_AFTER_DEPARTURE: &str = "graduated_after_departure";
}

// ── Trajectory output (one row per destination-flight student) ──────────────
pub mod trajectory {
    pub const STUDENT_ID: &str = "student_id";
    pub const COHORT: &str = "cohort";
    pub const FIRST_ABSENCE_YEAR: &str = "first_absence_year";
    pub const SCHEDULE_TRACK: &str = "schedule_track";
    pub const ENTRY_YEARS: &str = "entry_years";
    pub const LAST_YEARS: &str = "last_years";
    pub const INSTITUTION_IDS: &str = "institution_ids";
    pub const INSTITUTIONS: &str = "institutions";
    pub const PROGRAMS: &str = "programs";
    pub const KNOWLEDGE_AREAS: &str = "knowledge_areas";
    pub const DURATIONS: &str = "nominal_durations";
    pub const LEVELS: &str = "levels";
    pub const TIERS_1: &str = "institution_tiers_1";
    pub const TIERS_2: &str = "institution_tiers_2";
    pub const TIERS_3: &str = "institution_tiers_3";
    pub const ADMISSION_REQUIREMENTS: &str = "admission_requirements";
    pub const REST_YEARS: &str = "rest_years";
    pub const REST_INTERVAL: &str = "rest_interval";
    pub const REACHED_ADVANCED_LEVEL: &str = "reached_advanced_level";

    /// Per-stop list columns, in serialization order.
    pub const LISTS: [&str; 12] = [
        ENTRY_YEARS,
        LAST_YEARS,
        INSTITUTION_IDS,
        INSTITUTIONS,
        PROGRAMS,
        KNOWLEDGE_AREAS,
        DURATIONS,
        LEVELS,
        TIERS_1,
        TIERS_2,
        TIERS_3,
        ADMISSION_REQUIREMENTS,
    ];
}

// ── Trajectory stop output (one row per stop) ───────────────────────────────
pub mod stop {
    pub const STUDENT_ID: &str = "student_id";
    pub const SEQUENCE: &str = "sequence";
    pub const ENTRY_YEAR: &str = "entry_year";
    pub const LAST_YEAR: &str = "last_year";
    pub const INSTITUTION_ID: &str = "institution_id";
    pub const INSTITUTION_NAME: &str = "institution_name";
    pub const PROGRAM_NAME: &str = "program_name";
    pub const KNOWLEDGE_AREA: &str = "knowledge_area";
    pub const NOMINAL_DURATION: &str = "nominal_duration";
    pub const LEVEL: &str = "level";
    pub const INSTITUTION_TIER_1: &str = "institution_tier_1";
    pub const INSTITUTION_TIER_2: &str = "institution_tier_2";
    pub const INSTITUTION_TIER_3: &str = "institution_tier_3";
    pub const ADMISSION_REQUIREMENT: &str = "admission_requirement";
}

// ── Post-graduation trajectory output (one row per home graduate) ──────────
pub mod graduate {
    pub const STUDENT_ID: &str = "student_id";
    pub const COHORT: &str = "cohort";
    pub const GRADUATION_YEAR: &str = "graduation_year";
    pub const SCHEDULE_TRACK: &str = "schedule_track";
    pub const REENTRY_YEARS: &str = "reentry_years";
    pub const REENTRY_INTERVAL: &str = "reentry_interval";
    pub const FIRST_REENTRY_LEVEL: &str = "first_reentry_level";
    pub const HIGHEST_REENTRY_LEVEL: &str = "highest_reentry_level";
}

// ── Graduate re-entry by level ──────────────────────────────────────────────
pub mod reentry {
    pub const COHORT: &str = "cohort";
    pub const LEVEL: &str = "level";
    pub const FIRST_REENTRY: &str = "first_reentry";
    pub const HIGHEST_REENTRY: &str = "highest_reentry";
    pub const TRAJECTORIES: &str = "trajectories";
    pub const MEAN_DELAY: &str = "mean_delay_years";
    pub const MEDIAN_DELAY: &str = "median_delay_years";
    pub const MIN_DELAY: &str = "min_delay_years";
    pub const MAX_DELAY: &str = "max_delay_years";
}

// ── Per-cohort summary output ───────────────────────────────────────────────
pub mod summary {
    pub const COHORT: &str = "cohort";
    pub const ENTRANTS: &str = "entrants";
    pub const ACTIVE: &str = "active";
    pub const GRADUATES: &str = "graduates";
    pub const DESTINATION_FLIGHT: &str = "destination_flight";
    pub const TOTAL_ABANDONMENT: &str = "total_abandonment";
    pub const DATA_GAPS: &str = "data_gaps";
    pub const GRADUATED_ELSEWHERE: &str = "graduated_elsewhere";
}

// ── Level route transitions ─────────────────────────────────────────────────
pub mod route {
    pub const FROM_LEVEL: &str = "from_level";
    pub const TO_LEVEL: &str = "to_level";
    pub const STUDENTS: &str = "students";
}

// ── Classification labels ───────────────────────────────────────────────────
pub mod classification {
    pub const ACTIVE: &str = "Active";
    pub const GRADUATE: &str = "Graduate";
    pub const DESTINATION_FLIGHT: &str = "DestinationFlight";
    pub const TOTAL_ABANDONMENT: &str = "TotalAbandonment";
}
