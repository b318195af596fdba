//! CSV exports of the unified views through the loader and the pipeline.

use std::fs;

use ecas_attrition::config::GraduationPolicy;
use ecas_attrition::model::ScheduleTrack;
use ecas_attrition::{
    AttritionConfig, AttritionError, AttritionPipeline, Classification, FeedLoader, StudentId,
};
use tempfile::TempDir;

const ENROLLMENTS: &str = "\
mrun , cat_periodo,cod_inst,nomb_inst,nomb_carrera,jornada,dur_total_carr,anio_ing_carr_ori,nivel_global,tipo_inst_1
1,2015,104,ECAS,Contador Auditor,Diurna,8,2015,Pregrado,Institutos Profesionales
1,2016,104,ECAS,Contador Auditor,Diurna,8,2015,Pregrado,Institutos Profesionales
1, 2018 ,200,Universidad de Chile,Derecho,Diurna,10,2018,Pregrado,Universidades
1,2019,200,Universidad de Chile,Derecho,Diurna,10,2018,Pregrado,Universidades
1,2019,200,Universidad de Chile,Derecho,Diurna,10,2018,Pregrado,Universidades
1,2023,300,Universidad Diego Portales,Magíster en Derecho,Vespertina,4,2023,Postgrado,Universidades
2,2015,104,ECAS,Contador Auditor,Vespertina,10,2015,Pregrado,Institutos Profesionales
2,2016,104,ECAS,Contador Auditor,Vespertina,10,2015,Pregrado,Institutos Profesionales
3,2015,104,ECAS,Contador Auditor,Diurna,8,2015,Pregrado,Institutos Profesionales
3,2016,104,ECAS,Contador Auditor,Diurna,8,2015,Pregrado,Institutos Profesionales
3,2017,104,ECAS,Contador Auditor,Diurna,8,2015,Pregrado,Institutos Profesionales
3,2018,104,ECAS,Contador Auditor,Diurna,8,2015,Pregrado,Institutos Profesionales
3,2019,104,ECAS,Contador Auditor,Diurna,8,2015,Pregrado,Institutos Profesionales
3,2020,104,ECAS,Contador Auditor,Diurna,8,2015,Pregrado,Institutos Profesionales
4,2015,104,ECAS,Contador Auditor,Diurna,8,1900,Pregrado,Institutos Profesionales
5,2017,104,ECAS,Técnico en Auditoría,A Distancia,4,2017,Pregrado,Institutos Profesionales
5,2018,104,ECAS,Técnico en Auditoría,A Distancia,4,2017,Pregrado,Institutos Profesionales
";

const GRADUATIONS: &str = "\
mrun,cat_periodo,cod_inst,nomb_carrera,nomb_titulo_obtenido
2,2019,104,Contador Auditor,Contador Auditor
3,2020,104,Contador Auditor,
";

fn write_feeds() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("vista_matricula_unificada.csv"), ENROLLMENTS).unwrap();
    fs::write(dir.path().join("vista_titulados_unificada.csv"), GRADUATIONS).unwrap();
    dir
}

#[test]
fn csv_feeds_classify_end_to_end() {
    let dir = write_feeds();
    let loader = FeedLoader::new(dir.path());
    let enrollments = loader.load_enrollments("vista_matricula_unificada.csv").unwrap();
    let graduations = loader.load_graduations("vista_titulados_unificada.csv").unwrap();
    assert_eq!(enrollments.height(), 17);

    let run = AttritionPipeline::new(AttritionConfig::default())
        .unwrap()
        .run(&enrollments, &graduations, Some(2015))
        .unwrap();

    // Student 3 is present in 2020, the last home year in the feed.
    assert_eq!(run.diagnostics.max_observed_year, Some(2020));
    assert_eq!(run.classification_of(StudentId(3)), Some(Classification::Active));
    assert!(matches!(
        run.classification_of(StudentId(2)),
        Some(Classification::Graduate { .. })
    ));
    assert_eq!(
        run.classification_of(StudentId(1)),
        Some(Classification::DestinationFlight)
    );
    // Sentinel entry year, and a different cohort.
    assert_eq!(run.classification_of(StudentId(4)), None);
    assert_eq!(run.classification_of(StudentId(5)), None);
    assert_eq!(run.diagnostics.excluded_students, 1);
    assert_eq!(run.diagnostics.duplicates_removed, 1);
    let graduate = run.graduate_trajectory_of(StudentId(2)).unwrap();
    assert_eq!(graduate.graduation_year, 2019);
    assert!(!graduate.reentered());

    let trajectory = run.trajectory_of(StudentId(1)).unwrap();
    assert_eq!(trajectory.first_absence_year, 2017);
    assert_eq!(trajectory.schedule_track, Some(ScheduleTrack::Day));
    let spans: Vec<(i64, i32, i32)> = trajectory
        .stops()
        .iter()
        .map(|s| (s.institution_id, s.entry_year, s.last_year))
        .collect();
    assert_eq!(spans, vec![(200, 2018, 2019), (300, 2023, 2023)]);
    assert!(trajectory.reached_advanced_level());
    assert_eq!(
        trajectory.stops()[0].institution_tiers[0].as_deref(),
        Some("Universidades")
    );

    let flat = run.trajectory_frame().unwrap();
    let institutions: Vec<Option<&str>> = flat
        .column("institutions")
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(
        institutions,
        vec![Some("Universidad de Chile | Universidad Diego Portales")]
    );
}

#[test]
fn home_scope_narrows_the_population() {
    let dir = write_feeds();
    fs::write(
        dir.path().join("attrition.toml"),
        r#"
home_institution_id = 104

[home_scope]
schedule_tracks = ["day", "evening"]
duration_semesters = [8, 10]
"#,
    )
    .unwrap();

    let config = AttritionConfig::load(dir.path().join("attrition.toml")).unwrap();
    let loader = FeedLoader::new(dir.path());
    let enrollments = loader.load_enrollments("vista_matricula_unificada.csv").unwrap();
    let graduations = loader.load_graduations("vista_titulados_unificada.csv").unwrap();

    let run = AttritionPipeline::new(config)
        .unwrap()
        .run(&enrollments, &graduations, None)
        .unwrap();

    // The distance-learning program of student 5 is out of scope.
    assert_eq!(run.classification_of(StudentId(5)), None);
    assert_eq!(run.classifications.len(), 3);
}

#[test]
fn untitled_record_is_not_a_graduation() {
    let dir = write_feeds();
    // Drop student 3's last year so the untitled 2020 record is all that is left.
    let trimmed: String = ENROLLMENTS
        .lines()
        .filter(|l| !l.starts_with("3,2020"))
        .map(|l| format!("{l}\n"))
        .collect();
    fs::write(dir.path().join("trimmed.csv"), trimmed).unwrap();

    let loader = FeedLoader::new(dir.path());
    let enrollments = loader.load_enrollments("trimmed.csv").unwrap();
    let graduations = loader.load_graduations("vista_titulados_unificada.csv").unwrap();

    let mut config = AttritionConfig::default();
    config.graduation.policy = GraduationPolicy::Exact;
    let run = AttritionPipeline::new(config)
        .unwrap()
        .run(&enrollments, &graduations, Some(2015))
        .unwrap();

    // The feed now ends in 2019, and student 3 was there in 2019.
    assert_eq!(run.classification_of(StudentId(3)), Some(Classification::Active));
    assert_eq!(run.diagnostics.max_observed_year, Some(2019));
}

#[test]
fn missing_column_fails_loading() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.csv"), "mrun,cat_periodo\n1,2015\n").unwrap();

    let err = FeedLoader::new(dir.path())
        .load_enrollments("broken.csv")
        .unwrap_err();
    assert!(matches!(err, AttritionError::MissingColumn(_)));
}

#[test]
fn invalid_config_is_rejected() {
    let err = AttritionConfig::from_toml_str("cohort_min_year = 2030\ncohort_max_year = 2010\n")
        .unwrap_err();
    assert!(matches!(err, AttritionError::Validation(_)));
}
