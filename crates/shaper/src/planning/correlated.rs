//! Correlated-Collection Planner
//!
//! Splits a query shape into one plan per level of collection nesting.
//! Reference navigations are joined into the plan of their enclosing level as
//! extra segments; collection navigations and collection projections become
//! child plans correlated with their parent by the owning entity's key.

use crate::config::ShapeConfig;
use crate::error::{ShapeError, ShapeResult};
use crate::expr::{Filter, Lambda};
use crate::include::{EagerLoadTree, IncludeNode};
use crate::query::{CollectionProjection, CollectionTerminal, Projection, Query};
use crate::relationships::{CollectionKind, EntityType, Navigation, RelationshipModel};

use super::plan::{
    Cardinality, CollectionShape, CorrelatedPlan, IncludeShaper, InverseLink, ParentLink,
    PlanId, PlanSet, PlanSource, PlanTarget, SegmentJoin, SegmentSpec, Shaper,
};

/// Position inside a plan row: a segment of a plan and its entity type
#[derive(Debug, Clone)]
struct Scope {
    plan: PlanId,
    segment: String,
    entity_type: String,
}

/// Identity of a collection projection used to share sibling plans
#[derive(Debug, Clone, PartialEq)]
struct PlanSignature {
    parent: PlanId,
    segment: String,
    navigation: String,
    filter: Filter,
    terminal: CollectionTerminal,
    element: Projection,
}

/// Decomposes query shapes into correlated plans
pub struct CorrelatedPlanner<'a> {
    model: &'a RelationshipModel,
    config: &'a ShapeConfig,
    plans: Vec<CorrelatedPlan>,
    shared: Vec<(PlanSignature, PlanId)>,
}

impl<'a> CorrelatedPlanner<'a> {
    pub fn new(model: &'a RelationshipModel, config: &'a ShapeConfig) -> Self {
        Self {
            model,
            config,
            plans: Vec::new(),
            shared: Vec::new(),
        }
    }

    /// Decompose a query and its eager-load tree into an ordered plan set
    pub fn decompose(mut self, query: &Query, tree: &EagerLoadTree) -> ShapeResult<PlanSet> {
        let root = self.entity(&query.root)?;
        query.filter.validate_for_collection(&query.root)?;

        let root_id = self.push_plan(
            None,
            PlanSource::Root {
                entity_type: root.name.clone(),
            },
            &root,
            with_key_ordering(query.filter.clone(), &root.primary_key),
            Cardinality::Many,
            PlanTarget::Root,
            0,
        );

        let scope = Scope {
            plan: root_id,
            segment: String::new(),
            entity_type: root.name.clone(),
        };

        let includes = match query.projection {
            Projection::Entity => tree.children.as_slice(),
            _ => {
                if !tree.is_empty() {
                    tracing::debug!(
                        root = %query.root,
                        "Includes ignored because the query does not project the root entity"
                    );
                }
                &[]
            }
        };

        let shaper = self.projection_shaper(&scope, &query.projection, includes)?;
        self.plans[root_id.0].shaper = shaper;

        tracing::debug!(root = %query.root, plans = self.plans.len(), "Decomposed query");
        PlanSet::new(self.plans)
    }

    fn entity(&self, name: &str) -> ShapeResult<EntityType> {
        self.model
            .entity(name)
            .ok_or_else(|| ShapeError::InvalidShape(format!("unknown entity type '{}'", name)))
    }

    fn projection_navigation(&self, entity_type: &str, name: &str) -> ShapeResult<Navigation> {
        self.model.navigation(entity_type, name).ok_or_else(|| {
            ShapeError::InvalidShape(format!(
                "'{}' has no navigation named '{}'",
                entity_type, name
            ))
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn push_plan(
        &mut self,
        parent: Option<ParentLink>,
        source: PlanSource,
        element: &EntityType,
        filter: Filter,
        cardinality: Cardinality,
        fulfills: PlanTarget,
        depth: usize,
    ) -> PlanId {
        let id = PlanId(self.plans.len());
        self.plans.push(CorrelatedPlan {
            id,
            parent,
            source,
            element_type: element.name.clone(),
            filter,
            segments: vec![element_segment(element, String::new(), None)],
            cardinality,
            fulfills,
            shaper: Shaper::Constant(serde_json::Value::Null),
            depth,
        });
        id
    }

    /// Join a reference navigation into the plan below `scope`, returning the
    /// segment path
    fn join_segment(&mut self, scope: &Scope, navigation: &Navigation) -> ShapeResult<String> {
        let path = if scope.segment.is_empty() {
            navigation.name.clone()
        } else {
            format!("{}.{}", scope.segment, navigation.name)
        };

        if self.plans[scope.plan.0].segment(&path).is_none() {
            let target = self.entity(&navigation.target_type)?;
            let segment = element_segment(
                &target,
                path.clone(),
                Some(SegmentJoin {
                    parent_segment: scope.segment.clone(),
                    navigation: navigation.clone(),
                }),
            );
            self.plans[scope.plan.0].segments.push(segment);
        }

        Ok(path)
    }

    fn parent_link(&self, scope: &Scope) -> ShapeResult<ParentLink> {
        Ok(ParentLink {
            plan: scope.plan,
            segment: scope.segment.clone(),
            entity_type: scope.entity_type.clone(),
            key_fields: self.model.primary_key(&scope.entity_type)?,
        })
    }

    fn inverse_link(&self, navigation: &Navigation) -> ShapeResult<Option<InverseLink>> {
        if !self.config.navigation_fixup {
            return Ok(None);
        }

        match self.model.inverse_of(navigation) {
            Some(inverse) => {
                let kind = if inverse.is_collection() {
                    Some(inverse.collection_type.resolve(&inverse.display_name())?)
                } else {
                    None
                };
                Ok(Some(InverseLink {
                    navigation: inverse.name,
                    kind,
                }))
            }
            None => Ok(None),
        }
    }

    /// Entity shaper at `scope` with the given include nodes attached
    fn entity_shaper(&mut self, scope: &Scope, includes: &[IncludeNode]) -> ShapeResult<Shaper> {
        let entity = self.entity(&scope.entity_type)?;
        let mut include_shapers = Vec::with_capacity(includes.len());

        for node in includes {
            let navigation = &node.navigation;
            let inverse = self.inverse_link(navigation)?;

            if navigation.is_collection() {
                let kind = navigation
                    .collection_type
                    .resolve(&navigation.display_name())?;
                let target = self.entity(&navigation.target_type)?;
                let filter = node.filter.clone().unwrap_or_default();
                let depth = self.plans[scope.plan.0].depth + 1;
                let link = self.parent_link(scope)?;

                let child = self.push_plan(
                    Some(link),
                    PlanSource::Navigation(navigation.clone()),
                    &target,
                    with_key_ordering(filter, &target.primary_key),
                    Cardinality::Many,
                    PlanTarget::Include(node.path.clone()),
                    depth,
                );
                let child_scope = Scope {
                    plan: child,
                    segment: String::new(),
                    entity_type: target.name.clone(),
                };
                let shaper = self.entity_shaper(&child_scope, &node.children)?;
                self.plans[child.0].shaper = shaper;

                include_shapers.push(IncludeShaper::Collection {
                    navigation: navigation.name.clone(),
                    plan: child,
                    kind,
                    inverse,
                });
            } else {
                let segment = self.join_segment(scope, navigation)?;
                let target_scope = Scope {
                    plan: scope.plan,
                    segment: segment.clone(),
                    entity_type: navigation.target_type.clone(),
                };
                let target = self.entity_shaper(&target_scope, &node.children)?;

                include_shapers.push(IncludeShaper::Reference {
                    navigation: navigation.name.clone(),
                    segment,
                    target: Box::new(target),
                    inverse,
                });
            }
        }

        Ok(Shaper::Entity {
            segment: scope.segment.clone(),
            entity_type: entity.name.clone(),
            key_fields: entity.primary_key.clone(),
            fields: entity.fields.clone(),
            includes: include_shapers,
        })
    }

    fn projection_shaper(
        &mut self,
        scope: &Scope,
        projection: &Projection,
        includes: &[IncludeNode],
    ) -> ShapeResult<Shaper> {
        match projection {
            Projection::Entity => self.entity_shaper(scope, includes),
            Projection::Field(field) => {
                let entity = self.entity(&scope.entity_type)?;
                if !entity.has_field(field) {
                    return Err(ShapeError::InvalidShape(format!(
                        "'{}' has no field named '{}'",
                        entity.name, field
                    )));
                }
                Ok(Shaper::Field {
                    segment: scope.segment.clone(),
                    field: field.clone(),
                })
            }
            Projection::Constant(value) => Ok(Shaper::Constant(value.clone())),
            Projection::Reference {
                navigation,
                projection,
            } => {
                let navigation = self.projection_navigation(&scope.entity_type, navigation)?;
                if navigation.is_collection() {
                    return Err(ShapeError::InvalidShape(format!(
                        "collection navigation '{}' must be projected as a collection",
                        navigation.display_name()
                    )));
                }

                let segment = self.join_segment(scope, &navigation)?;
                let inner_scope = Scope {
                    plan: scope.plan,
                    segment: segment.clone(),
                    entity_type: navigation.target_type.clone(),
                };
                let inner = self.projection_shaper(&inner_scope, projection, &[])?;

                Ok(Shaper::Reference {
                    segment,
                    key_fields: self.model.primary_key(&navigation.target_type)?,
                    inner: Box::new(inner),
                })
            }
            Projection::Collection(collection) => self.collection_shaper(scope, collection),
            Projection::Record { type_name, fields } => {
                let mut shapers = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    shapers.push((name.clone(), self.projection_shaper(scope, field, &[])?));
                }
                Ok(Shaper::Record {
                    type_name: type_name.clone(),
                    fields: shapers,
                })
            }
        }
    }

    fn collection_shaper(
        &mut self,
        scope: &Scope,
        collection: &CollectionProjection,
    ) -> ShapeResult<Shaper> {
        let navigation = self.projection_navigation(&scope.entity_type, &collection.navigation)?;
        let display = navigation.display_name();

        if !navigation.is_collection() {
            return Err(ShapeError::InvalidShape(format!(
                "reference navigation '{}' cannot be projected as a collection",
                display
            )));
        }

        collection.filter.validate_for_collection(&display)?;

        let (shape, cardinality, filter) = match collection.terminal {
            CollectionTerminal::AsNavigation => (
                CollectionShape::Collection(navigation.collection_type.resolve(&display)?),
                Cardinality::Many,
                collection.filter.clone(),
            ),
            CollectionTerminal::ToList => (
                CollectionShape::Collection(CollectionKind::List),
                Cardinality::Many,
                collection.filter.clone(),
            ),
            CollectionTerminal::First => (
                CollectionShape::First,
                Cardinality::Single,
                collection.filter.clone().take(1),
            ),
            CollectionTerminal::Count => (
                CollectionShape::Count,
                Cardinality::Count,
                collection.filter.clone(),
            ),
        };

        let signature = PlanSignature {
            parent: scope.plan,
            segment: scope.segment.clone(),
            navigation: display.clone(),
            filter: filter.normalized(),
            terminal: collection.terminal,
            element: collection.element.clone(),
        };

        let plan = match self.shared.iter().find(|(s, _)| *s == signature) {
            Some((_, id)) => {
                let navigation_name = &display;
                tracing::debug!(plan = %id, navigation = %navigation_name, "Sharing sibling plan");
                *id
            }
            None => {
                let target = self.entity(&navigation.target_type)?;
                let depth = self.plans[scope.plan.0].depth + 1;
                let link = self.parent_link(scope)?;
                let child = self.push_plan(
                    Some(link),
                    PlanSource::Navigation(navigation.clone()),
                    &target,
                    with_key_ordering(filter, &target.primary_key),
                    cardinality,
                    PlanTarget::Projection(projection_path(&scope.segment, &navigation.name)),
                    depth,
                );

                let shaper = if cardinality == Cardinality::Count {
                    Shaper::Constant(serde_json::Value::Null)
                } else {
                    let child_scope = Scope {
                        plan: child,
                        segment: String::new(),
                        entity_type: target.name.clone(),
                    };
                    self.projection_shaper(&child_scope, &collection.element, &[])?
                };
                self.plans[child.0].shaper = shaper;
                self.shared.push((signature, child));
                child
            }
        };

        Ok(Shaper::Collection {
            plan,
            segment: scope.segment.clone(),
            key_fields: self.model.primary_key(&scope.entity_type)?,
            shape,
        })
    }
}

fn projection_path(segment: &str, navigation: &str) -> String {
    if segment.is_empty() {
        navigation.to_string()
    } else {
        format!("{}.{}", segment, navigation)
    }
}

fn element_segment(entity: &EntityType, path: String, join: Option<SegmentJoin>) -> SegmentSpec {
    SegmentSpec {
        path,
        entity_type: entity.name.clone(),
        join,
        key_fields: entity.primary_key.clone(),
        fields: entity.fields.clone(),
    }
}

/// Append the element key as a final ordering so paging is deterministic
fn with_key_ordering(mut filter: Filter, key_fields: &[String]) -> Filter {
    if !filter.has_paging() {
        return filter;
    }

    for field in key_fields {
        let key = Lambda::field("e", field);
        let normalized = key.normalized();
        if !filter
            .ordering
            .iter()
            .any(|term| term.key.normalized() == normalized)
        {
            filter = if filter.ordering.is_empty() {
                filter.order_by(key)
            } else {
                filter.then_by(key)
            };
        }
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::expr::{lit, param};
    use crate::include::build_include_tree;
    use crate::relationships::{DeclaredCollectionType, EntityType};

    fn shop_model() -> RelationshipModel {
        let model = RelationshipModel::new();
        model
            .register_entity(EntityType::new("Customer").with_fields(&["Name"]))
            .unwrap();
        model
            .register_entity(EntityType::new("Order").with_fields(&["CustomerId", "Total"]))
            .unwrap();
        model
            .register_entity(EntityType::new("OrderLine").with_fields(&["OrderId", "Quantity"]))
            .unwrap();
        for navigation in [
            Navigation::has_many("Customer", "Orders", "Order", "CustomerId")
                .with_inverse("Customer"),
            Navigation::belongs_to("Order", "Customer", "Customer", "CustomerId")
                .with_inverse("Orders"),
            Navigation::has_many("Order", "Lines", "OrderLine", "OrderId")
                .with_collection_type(DeclaredCollectionType::Set),
        ] {
            model.register_navigation(navigation).unwrap();
        }
        model
    }

    fn plan(query: &Query) -> ShapeResult<PlanSet> {
        let model = shop_model();
        let config = ShapeConfig::default();
        let (tree, _) = build_include_tree(&model, &config, query)?;
        CorrelatedPlanner::new(&model, &config).decompose(query, &tree)
    }

    #[test]
    fn test_nested_collections_become_dependent_plans() {
        let query = Query::from("Customer")
            .include("Orders")
            .then_include("Lines");
        let plans = plan(&query).unwrap();

        assert_eq!(plans.len(), 3);
        assert_eq!(plans.get(PlanId(1)).unwrap().fulfills, PlanTarget::Include("Orders".into()));
        assert_eq!(
            plans.get(PlanId(2)).unwrap().parent.as_ref().unwrap().plan,
            PlanId(1)
        );
        assert_eq!(plans.execution_phases().len(), 3);

        match &plans.root().shaper {
            Shaper::Entity { includes, .. } => match &includes[0] {
                IncludeShaper::Collection { inverse, kind, .. } => {
                    assert_eq!(*kind, CollectionKind::List);
                    assert_eq!(inverse.as_ref().unwrap().navigation, "Customer");
                }
                other => panic!("unexpected include {:?}", other),
            },
            other => panic!("unexpected shaper {:?}", other),
        }
    }

    #[test]
    fn test_reference_is_joined_not_planned() {
        let query = Query::from("Order").include("Customer");
        let plans = plan(&query).unwrap();

        assert_eq!(plans.len(), 1);
        let root = plans.root();
        assert_eq!(root.segments.len(), 2);
        assert_eq!(root.segments[1].path, "Customer");
        assert!(root.columns().contains(&"$.Customer.Name".to_string()));
    }

    #[test]
    fn test_paged_plan_gets_key_ordering() {
        let filter = Filter::new()
            .order_by(Lambda::field("o", "Total"))
            .skip(1)
            .take(2);
        let query = Query::from("Customer").include_filtered("Orders", filter);
        let plans = plan(&query).unwrap();

        let child = plans.get(PlanId(1)).unwrap();
        assert_eq!(child.filter.ordering.len(), 2);
        assert_eq!(child.filter.ordering[1].key.to_string(), "e => e.Id");
    }

    #[test]
    fn test_identical_sibling_projections_share_a_plan() {
        let big =
            |p: &str| Filter::new().where_(Lambda::new(p, param(p).prop("Total").gt(lit(10))));
        let totals = |filter: Filter| {
            Projection::collection(
                "Orders",
                filter,
                Projection::field("Total"),
                CollectionTerminal::ToList,
            )
        };
        let query = Query::from("Customer").select(Projection::record(vec![
            ("A", totals(big("a"))),
            ("B", totals(big("b"))),
            ("C", totals(Filter::new())),
        ]));
        let plans = plan(&query).unwrap();

        assert_eq!(plans.len(), 3);
    }

    #[test]
    fn test_first_degrades_to_single_row_plan() {
        let query = Query::from("Customer").select(Projection::collection(
            "Orders",
            Filter::new().order_by_desc(Lambda::field("o", "Total")),
            Projection::Entity,
            CollectionTerminal::First,
        ));
        let plans = plan(&query).unwrap();

        let child = plans.get(PlanId(1)).unwrap();
        assert_eq!(child.cardinality, Cardinality::Single);
        assert_eq!(child.filter.take, Some(1));
    }

    #[test]
    fn test_outer_parameter_in_projection_filter_rejected() {
        let filter = Filter::new().where_(Lambda::new(
            "o",
            param("o").prop("CustomerId").equals(param("c").prop("Id")),
        ));
        let query = Query::from("Customer").select(Projection::collection(
            "Orders",
            filter,
            Projection::Entity,
            CollectionTerminal::ToList,
        ));

        let error = plan(&query).unwrap_err();
        assert_eq!(error.category(), ErrorCategory::UnsupportedFilterPosition);
        assert_eq!(error.paths(), vec!["Customer.Orders"]);
    }

    #[test]
    fn test_distinct_with_paging_rejected() {
        let filter = Filter::new().distinct().order_by(Lambda::field("o", "Id")).take(3);
        let query = Query::from("Customer").select(Projection::collection(
            "Orders",
            filter,
            Projection::field("Total"),
            CollectionTerminal::ToList,
        ));

        let error = plan(&query).unwrap_err();
        assert_eq!(error.category(), ErrorCategory::UnsupportedFilterPosition);
    }

    #[test]
    fn test_collection_projection_through_reference() {
        let query = Query::from("Order").select(Projection::reference(
            "Customer",
            Projection::count("Orders"),
        ));
        let plans = plan(&query).unwrap();

        let child = plans.get(PlanId(1)).unwrap();
        assert_eq!(child.cardinality, Cardinality::Count);
        assert_eq!(child.parent.as_ref().unwrap().segment, "Customer");
        assert_eq!(child.fulfills, PlanTarget::Projection("Customer.Orders".into()));
    }
}
