use std::collections::{BTreeMap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use polars::prelude::*;

use crate::error::Result;
use crate::model::ProgramLevel;
use crate::post_graduation::GraduateTrajectory;
use crate::schema::route;
use crate::trajectory::{Trajectory, TrajectoryStop};

/// Origin node every route starts from: the undergraduate program left behind.
pub const HOME_ORIGIN: &str = "home_undergraduate";

const ROUTE_SEPARATOR: &str = " -> ";

/// Directed graph of level transitions across destination-flight students
/// or home graduates.
///
/// Each student contributes one route: the home origin followed by the
/// distinct program levels of their trajectory in first-occurrence order.
/// Edge weights count the students that took each transition.
pub struct LevelRouteGraph {
    graph: DiGraph<String, usize>,
    /// Map from node label → NodeIndex for fast lookup.
    node_map: HashMap<String, NodeIndex>,
    routes: Vec<Vec<String>>,
}

impl LevelRouteGraph {
    pub fn from_trajectories(trajectories: &[Trajectory]) -> Self {
        Self::from_routes(trajectories.iter().map(|t| route_of(t.stops())))
    }

    /// Routes of home graduates after their degree. A graduate who never
    /// enrolled again contributes the bare origin.
    pub fn from_graduate_trajectories(trajectories: &[GraduateTrajectory]) -> Self {
        Self::from_routes(trajectories.iter().map(|t| route_of(t.stops())))
    }

    fn from_routes(all_routes: impl Iterator<Item = Vec<String>>) -> Self {
        let mut graph = DiGraph::new();
        let mut node_map: HashMap<String, NodeIndex> = HashMap::new();
        let mut routes = Vec::new();

        let get_or_insert = |map: &mut HashMap<String, NodeIndex>,
                             g: &mut DiGraph<String, usize>,
                             label: &str|
         -> NodeIndex {
            *map.entry(label.to_string())
                .or_insert_with(|| g.add_node(label.to_string()))
        };

        for route in all_routes {
            for pair in route.windows(2) {
                let from = get_or_insert(&mut node_map, &mut graph, &pair[0]);
                let to = get_or_insert(&mut node_map, &mut graph, &pair[1]);
                match graph.find_edge(from, to) {
                    Some(edge) => graph[edge] += 1,
                    None => {
                        graph.add_edge(from, to, 1);
                    }
                }
            }
            routes.push(route);
        }

        Self {
            graph,
            node_map,
            routes,
        }
    }

    /// (from, to, students), most travelled first.
    pub fn transitions(&self) -> Vec<(String, String, usize)> {
        let mut out: Vec<_> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].clone(),
                    self.graph[e.target()].clone(),
                    *e.weight(),
                )
            })
            .collect();
        out.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| (&a.0, &a.1).cmp(&(&b.0, &b.1))));
        out
    }

    /// Full route label → students, most common first.
    pub fn route_counts(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for route in &self.routes {
            *counts.entry(route.join(ROUTE_SEPARATOR)).or_default() += 1;
        }
        let mut out: Vec<_> = counts.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Students whose route passes through `level`.
    pub fn students_reaching(&self, level: ProgramLevel) -> usize {
        if !self.node_map.contains_key(level.as_str()) {
            return 0;
        }
        self.routes
            .iter()
            .filter(|r| r.iter().any(|l| l == level.as_str()))
            .count()
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let transitions = self.transitions();
        let from: Vec<&str> = transitions.iter().map(|t| t.0.as_str()).collect();
        let to: Vec<&str> = transitions.iter().map(|t| t.1.as_str()).collect();
        let students: Vec<u64> = transitions.iter().map(|t| t.2 as u64).collect();

        let df = DataFrame::new(vec![
            Column::new(route::FROM_LEVEL.into(), &from),
            Column::new(route::TO_LEVEL.into(), &to),
            Column::new(route::STUDENTS.into(), &students),
        ])?;
        Ok(df)
    }
}

fn route_of(stops: &[TrajectoryStop]) -> Vec<String> {
    let mut route = vec![HOME_ORIGIN.to_string()];
    let mut seen: Vec<ProgramLevel> = Vec::new();
    for level in stops.iter().filter_map(|s| s.program_level) {
        if !seen.contains(&level) {
            seen.push(level);
            route.push(level.as_str().to_string());
        }
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::CohortTable;
    use crate::model::{DepartureEvent, EnrollmentRecord, StudentId};
    use crate::trajectory::aggregate_trajectories;

    fn trajectories(plans: &[(i64, &[(i32, ProgramLevel)])]) -> Vec<Trajectory> {
        let mut events = Vec::new();
        let mut records = BTreeMap::new();
        for (student, stops) in plans {
            let id = StudentId(*student);
            events.push(DepartureEvent {
                student_id: id,
                cohort: 2015,
                last_home_year: 2016,
                first_absence_year: 2017,
            });
            let rows = stops
                .iter()
                .enumerate()
                .map(|(i, (year, level))| {
                    EnrollmentRecord::new(id, *year, 200 + i as i64)
                        .with_program("Programa")
                        .with_level(*level)
                })
                .collect();
            records.insert(id, rows);
        }
        aggregate_trajectories(&events, &records, &CohortTable::default())
    }

    #[test]
    fn routes_follow_first_occurrence_of_each_level() {
        use ProgramLevel::*;
        let graph = LevelRouteGraph::from_trajectories(&trajectories(&[
            (1, &[(2017, Undergraduate), (2020, Graduate), (2022, Undergraduate)][..]),
            (2, &[(2018, Undergraduate)][..]),
            (3, &[(2019, Undergraduate), (2023, Graduate)][..]),
        ]));

        assert_eq!(
            graph.route_counts(),
            vec![
                ("home_undergraduate -> undergraduate -> graduate".to_string(), 2),
                ("home_undergraduate -> undergraduate".to_string(), 1),
            ]
        );
        assert_eq!(graph.students_reaching(Graduate), 2);
        assert_eq!(graph.students_reaching(PostTitle), 0);
    }

    #[test]
    fn transitions_carry_student_counts() {
        use ProgramLevel::*;
        let graph = LevelRouteGraph::from_trajectories(&trajectories(&[
            (1, &[(2017, Undergraduate), (2020, Graduate)][..]),
            (2, &[(2018, Undergraduate)][..]),
            (3, &[(2019, PostTitle)][..]),
        ]));

        let transitions = graph.transitions();
        assert_eq!(
            transitions[0],
            (HOME_ORIGIN.to_string(), "undergraduate".to_string(), 2)
        );
        assert_eq!(transitions.len(), 3);

        let df = graph.to_frame().unwrap();
        assert_eq!(df.height(), 3);
        let students: Vec<Option<u64>> = df
            .column(route::STUDENTS)
            .unwrap()
            .u64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(students, vec![Some(2), Some(1), Some(1)]);
    }

    #[test]
    fn graduates_without_reentry_count_as_bare_origin() {
        use ProgramLevel::*;
        let stop = |year: i32, level: ProgramLevel| TrajectoryStop {
            entry_year: year,
            last_year: year,
            institution_id: 300,
            institution_name: None,
            program_name: Some("Magíster".into()),
            knowledge_area: None,
            nominal_duration: None,
            program_level: Some(level),
            institution_tiers: [None, None, None],
            admission_requirement: None,
        };
        let graduates = [
            GraduateTrajectory::new(StudentId(1), 2015, 2019, None, vec![stop(2021, Graduate)]),
            GraduateTrajectory::new(StudentId(2), 2015, 2019, None, Vec::new()),
            GraduateTrajectory::new(StudentId(3), 2015, 2020, None, Vec::new()),
        ];
        let graph = LevelRouteGraph::from_graduate_trajectories(&graduates);

        assert_eq!(
            graph.route_counts(),
            vec![
                (HOME_ORIGIN.to_string(), 2),
                ("home_undergraduate -> graduate".to_string(), 1),
            ]
        );
        assert_eq!(graph.transitions().len(), 1);
        assert_eq!(graph.students_reaching(Graduate), 1);
    }

    #[test]
    fn empty_input_builds_an_empty_graph() {
        let graph = LevelRouteGraph::from_trajectories(&[]);
        assert!(graph.transitions().is_empty());
        assert!(graph.route_counts().is_empty());
        assert_eq!(graph.to_frame().unwrap().height(), 0);
    }
}
