use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use crate::{
    Error, Result,
    target::{RouteEdge, Target},
};

/// Immutable, ordered collection of [`RouteEdge`]s.
///
/// Cloning is cheap; all clones share the same edge slice, so the table can
/// be handed to every routing task without locking.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    edges: Arc<[RouteEdge]>,
}

impl RoutingTable {
    pub fn new(edges: Vec<RouteEdge>) -> Self {
        Self {
            edges: edges.into(),
        }
    }

    /// All edges in declaration order.
    pub fn edges(&self) -> &[RouteEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Edges delivering into `backend`, in table order.
    pub fn edges_into(&self, backend: &str) -> Vec<&RouteEdge> {
        self.edges
            .iter()
            .filter(|edge| edge.to.backend == backend)
            .collect()
    }

    /// Edges originating on `backend`, in table order.
    pub fn edges_out_of(&self, backend: &str) -> Vec<&RouteEdge> {
        self.edges
            .iter()
            .filter(|edge| edge.from.backend == backend)
            .collect()
    }

    /// Edges whose source is exactly `source` (backend and room).
    pub fn edges_from(&self, source: &Target) -> Vec<&RouteEdge> {
        self.edges
            .iter()
            .filter(|edge| edge.from == *source)
            .collect()
    }

    /// Rooms `backend` has to be present in: every destination delivering
    /// into it plus every source originating on it.
    pub fn joined_targets(&self, backend: &str) -> BTreeSet<Target> {
        let inbound = self.edges_into(backend).into_iter().map(|e| &e.to);
        let outbound = self.edges_out_of(backend).into_iter().map(|e| &e.from);
        inbound.chain(outbound).cloned().collect()
    }

    /// Every backend name referenced by any edge.
    pub fn backends(&self) -> BTreeSet<&str> {
        self.edges
            .iter()
            .flat_map(|e| [e.from.backend.as_str(), e.to.backend.as_str()])
            .collect()
    }

    /// Reject edges with empty endpoints or endpoints naming a backend that
    /// is not in `known`.
    pub fn check_backends<'a>(&self, known: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let known: HashSet<&str> = known.into_iter().collect();
        for (edge_index, edge) in self.edges.iter().enumerate() {
            for target in [&edge.from, &edge.to] {
                if target.backend.is_empty() {
                    return Err(Error::EmptyField {
                        edge_index,
                        field: "server",
                    });
                }
                if target.room.is_empty() {
                    return Err(Error::EmptyField {
                        edge_index,
                        field: "name",
                    });
                }
                if !known.contains(target.backend.as_str()) {
                    return Err(Error::UnknownBackend {
                        edge_index,
                        backend: target.backend.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl From<Vec<RouteEdge>> for RoutingTable {
    fn from(edges: Vec<RouteEdge>) -> Self {
        Self::new(edges)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn edge(from: (&str, &str), to: (&str, &str)) -> RouteEdge {
        RouteEdge::new(Target::new(from.0, from.1), Target::new(to.0, to.1))
    }

    fn sample() -> RoutingTable {
        RoutingTable::new(vec![
            edge(("irc1", "#general"), ("matrix1", "!room:x")),
            edge(("matrix1", "!room:x"), ("irc1", "#general")),
            edge(("irc1", "#general"), ("matrix1", "!other:x")),
            edge(("irc2", "#ops"), ("irc1", "#ops-mirror")),
        ])
    }

    #[test]
    fn edges_into_keeps_table_order() {
        let table = sample();
        let into: Vec<_> = table.edges_into("matrix1").into_iter().cloned().collect();
        assert_eq!(into, vec![
            edge(("irc1", "#general"), ("matrix1", "!room:x")),
            edge(("irc1", "#general"), ("matrix1", "!other:x")),
        ]);
    }

    #[test]
    fn edges_out_of_keeps_table_order() {
        let table = sample();
        let out: Vec<_> = table.edges_out_of("irc1").into_iter().cloned().collect();
        assert_eq!(out, vec![
            edge(("irc1", "#general"), ("matrix1", "!room:x")),
            edge(("irc1", "#general"), ("matrix1", "!other:x")),
        ]);
    }

    #[rstest]
    #[case::exact(("irc1", "#general"), 2)]
    #[case::room_mismatch(("irc1", "#random"), 0)]
    #[case::backend_mismatch(("irc2", "#general"), 0)]
    #[case::unknown(("nope", "#general"), 0)]
    fn edges_from_matches_backend_and_room(#[case] source: (&str, &str), #[case] n: usize) {
        let table = sample();
        let source = Target::new(source.0, source.1);
        let found = table.edges_from(&source);
        assert_eq!(found.len(), n);
        assert!(found.iter().all(|e| e.from == source));
    }

    #[test]
    fn joined_targets_is_union_of_in_and_out() {
        let table = sample();
        let joined = table.joined_targets("irc1");
        let expected: BTreeSet<_> = [
            Target::new("irc1", "#general"),
            Target::new("irc1", "#ops-mirror"),
        ]
        .into_iter()
        .collect();
        assert_eq!(joined, expected);
    }

    #[test]
    fn joined_targets_ignores_input_order() {
        let forward = sample();
        let mut reversed = forward.edges().to_vec();
        reversed.reverse();
        let reversed = RoutingTable::new(reversed);

        for backend in ["irc1", "irc2", "matrix1", "missing"] {
            assert_eq!(
                forward.joined_targets(backend),
                reversed.joined_targets(backend)
            );
        }
    }

    #[test]
    fn same_room_name_on_different_backends_stays_distinct() {
        let table = RoutingTable::new(vec![edge(("irc1", "#x"), ("irc2", "#x"))]);
        assert_eq!(table.joined_targets("irc1").len(), 1);
        assert_eq!(table.joined_targets("irc2").len(), 1);
        assert_eq!(
            table.joined_targets("irc2").into_iter().next(),
            Some(Target::new("irc2", "#x"))
        );
    }

    #[test]
    fn empty_table_yields_empty_results() {
        let table = RoutingTable::default();
        assert!(table.is_empty());
        assert!(table.edges_into("irc1").is_empty());
        assert!(table.edges_out_of("irc1").is_empty());
        assert!(table.edges_from(&Target::new("irc1", "#a")).is_empty());
        assert!(table.joined_targets("irc1").is_empty());
    }

    #[test]
    fn backends_lists_both_endpoints() {
        let table = sample();
        let names: Vec<_> = table.backends().into_iter().collect();
        assert_eq!(names, vec!["irc1", "irc2", "matrix1"]);
    }

    #[test]
    fn check_backends_accepts_known() {
        assert!(sample().check_backends(["irc1", "irc2", "matrix1"]).is_ok());
    }

    #[test]
    fn check_backends_reports_first_unknown() {
        let err = sample().check_backends(["irc1", "matrix1"]).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownBackend { edge_index: 3, ref backend } if backend == "irc2"
        ));
        assert_eq!(err.to_string(), "route #3 references unknown backend 'irc2'");
    }

    #[test]
    fn check_backends_rejects_empty_room() {
        let table = RoutingTable::new(vec![edge(("irc1", ""), ("irc1", "#b"))]);
        assert!(matches!(
            table.check_backends(["irc1"]),
            Err(Error::EmptyField { edge_index: 0, field: "name" })
        ));
    }
}
