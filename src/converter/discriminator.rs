//! Discriminator path walking.
//!
//! A discriminator path such as `telecom.system`, `resolve().meta`,
//! `extension('http://x').value` or `value.ofType(Quantity)` is walked from a
//! slice entry to the element definition that carries the discriminating
//! constraint. When the current profile does not constrain an element's
//! children, the walk continues in the profile of the element's type.

use std::sync::Arc;

use super::Compilation;
use crate::error::{CompileError, Result};
use crate::navigator::ElementNavigator;
use crate::types::schema::{Assertion, PathSelector, PathStep};
use crate::types::structure_definition::{Discriminator, ElementDefinition, StructureDefinition};

/// A position reached by the walker
#[derive(Clone)]
struct Position {
    /// `None` for the profile being compiled
    profile: Option<Arc<StructureDefinition>>,
    index: usize,
    /// Narrowing applied by `ofType()`
    type_filter: Option<String>,
}

/// Parse a discriminator path into steps.
pub fn parse_path(path: &str) -> std::result::Result<Vec<PathStep>, String> {
    let mut steps = Vec::new();
    for segment in split_segments(path)? {
        let step = match segment.as_str() {
            "$this" => PathStep::This,
            "resolve()" => PathStep::Resolve,
            s if s.starts_with("extension(") => PathStep::Extension(call_argument(s)?),
            s if s.starts_with("ofType(") => PathStep::OfType(call_argument(s)?),
            s if s.contains('(') => return Err(format!("unsupported function '{s}'")),
            s if s.is_empty() => return Err(format!("empty segment in '{path}'")),
            s => PathStep::Child(s.to_string()),
        };
        steps.push(step);
    }
    Ok(steps)
}

/// Split on dots that are not inside parentheses or quotes
fn split_segments(path: &str) -> std::result::Result<Vec<String>, String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;
    for c in path.chars() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unbalanced parentheses in '{path}'"))?
            }
            '.' if depth == 0 && !quoted => {
                segments.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if depth != 0 || quoted {
        return Err(format!("unbalanced path '{path}'"));
    }
    segments.push(current);
    Ok(segments)
}

fn call_argument(segment: &str) -> std::result::Result<String, String> {
    let open = segment.find('(').ok_or_else(|| format!("malformed call '{segment}'"))?;
    let inner = segment[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| format!("malformed call '{segment}'"))?;
    Ok(inner.trim().trim_matches('\'').to_string())
}

/// Condition that decides whether a value belongs to the slice at `slice_index`.
pub(crate) async fn condition(
    ctx: &Compilation<'_>,
    slice_index: usize,
    discriminator: &Discriminator,
) -> Result<Assertion> {
    let slice = ctx.nav.element(slice_index);
    let kind = discriminator.kind.as_str();
    match kind {
        "exists" => return Ok(Assertion::success()),
        "profile" => {
            return Err(ctx.fault(slice, "profile discriminators are not supported"));
        }
        "value" | "pattern" | "type" => {}
        other => {
            return Err(ctx.fault(slice, format!("unknown discriminator type '{other}'")));
        }
    }

    let steps = parse_path(&discriminator.path).map_err(|msg| ctx.fault(slice, msg))?;
    let mut targets = walk(ctx, slice_index, &steps).await?;
    let target = match targets.len() {
        0 => {
            return Err(ctx.fault(
                slice,
                format!(
                    "discriminator path '{}' does not lead to an element",
                    discriminator.path
                ),
            ));
        }
        1 => targets.remove(0),
        n => {
            return Err(ctx.fault(
                slice,
                format!(
                    "discriminator path '{}' is ambiguous, it leads to {n} elements",
                    discriminator.path
                ),
            ));
        }
    };

    let assertion = if kind == "type" {
        let codes: Vec<String> = match &target.type_filter {
            Some(filter) => vec![filter.clone()],
            None => target.element.type_codes().into_iter().map(str::to_string).collect(),
        };
        if codes.is_empty() {
            return Err(ctx.fault(
                slice,
                format!(
                    "type discriminator target '{}' declares no types",
                    target.element.id_or_path()
                ),
            ));
        }
        Assertion::TypeLabel(codes)
    } else {
        value_condition(ctx, slice, &target.element, &discriminator.path)?
    };

    Ok(Assertion::PathSelector(PathSelector {
        steps,
        assertion: Box::new(assertion),
    }))
}

/// Value and pattern discriminators both accept fixed, pattern and binding
/// constraints on the target, in conjunction.
fn value_condition(
    ctx: &Compilation<'_>,
    slice: &ElementDefinition,
    target: &ElementDefinition,
    path: &str,
) -> Result<Assertion> {
    let mut parts = Vec::new();
    if let Some((_, value)) = target.fixed() {
        parts.push(Assertion::Fixed(value.clone()));
    }
    if let Some((_, value)) = target.pattern() {
        parts.push(Assertion::Pattern(value.clone()));
    }
    if let Some(binding) = ctx.binding(target) {
        parts.push(binding);
    }
    if parts.is_empty() {
        return Err(ctx.fault(
            slice,
            format!(
                "discriminator target '{}' (path '{path}') has no fixed value, pattern or binding",
                target.id_or_path()
            ),
        ));
    }
    Ok(Assertion::all_of(parts))
}

struct Target {
    element: ElementDefinition,
    type_filter: Option<String>,
}

async fn walk(ctx: &Compilation<'_>, start: usize, steps: &[PathStep]) -> Result<Vec<Target>> {
    let walker = Walker { ctx };
    let mut current = vec![Position {
        profile: None,
        index: start,
        type_filter: None,
    }];

    for step in steps {
        let mut next = Vec::new();
        for position in current {
            match step {
                PathStep::This => next.push(position),
                PathStep::Child(name) => next.extend(walker.child(&position, name).await?),
                PathStep::Resolve => next.extend(walker.resolve(&position).await?),
                PathStep::Extension(url) => next.extend(walker.extension(&position, url).await?),
                PathStep::OfType(code) => {
                    let element = walker.element(&position);
                    if element.type_codes().contains(&code.as_str()) {
                        next.push(Position {
                            type_filter: Some(code.clone()),
                            ..position
                        });
                    }
                }
            }
        }
        current = next;
    }

    Ok(current
        .iter()
        .map(|p| Target {
            element: walker.element(p).clone(),
            type_filter: p.type_filter.clone(),
        })
        .collect())
}

struct Walker<'c, 'a> {
    ctx: &'c Compilation<'a>,
}

impl Walker<'_, '_> {
    fn navigator<'p>(&'p self, position: &'p Position) -> ElementNavigator<'p> {
        match &position.profile {
            Some(profile) => ElementNavigator::new(profile.elements()),
            None => self.ctx.nav,
        }
    }

    fn element<'p>(&'p self, position: &'p Position) -> &'p ElementDefinition {
        self.navigator(position).element(position.index)
    }

    async fn fetch(&self, url: &str) -> Result<Arc<StructureDefinition>> {
        let canonical = crate::types::schema::CanonicalId::parse(url);
        let found = self
            .ctx
            .source
            .resolve(&canonical.url, canonical.version.as_deref())
            .await
            .map_err(|err| CompileError::Source(err.to_string()))?;
        match found {
            Some(profile) if !profile.elements().is_empty() => Ok(profile),
            Some(_) => Err(CompileError::empty_profile(url)),
            None => Err(CompileError::profile_not_found(url)),
        }
    }

    fn at_root(profile: Arc<StructureDefinition>) -> Position {
        Position {
            profile: Some(profile),
            index: 0,
            type_filter: None,
        }
    }

    /// Profiles describing the type of the element at `position`
    fn type_profiles(&self, position: &Position) -> Vec<String> {
        let element = self.element(position);
        element
            .types
            .iter()
            .filter(|t| match &position.type_filter {
                Some(filter) => t.code.as_deref() == Some(filter.as_str()),
                None => true,
            })
            .flat_map(|t| {
                if t.profile.is_empty() {
                    t.code
                        .iter()
                        .map(|code| self.ctx.settings.type_canonical(code))
                        .collect::<Vec<_>>()
                } else {
                    t.profile.clone()
                }
            })
            .collect()
    }

    async fn child(&self, position: &Position, name: &str) -> Result<Vec<Position>> {
        let nav = self.navigator(position);
        if let Some(index) = nav.child_by_name(position.index, name) {
            return Ok(vec![Position {
                profile: position.profile.clone(),
                index,
                type_filter: None,
            }]);
        }
        if nav.has_children(position.index) {
            return Ok(Vec::new());
        }

        // Content references point at a backbone defined in the same profile
        let element = nav.element(position.index);
        if let Some(reference) = &element.content_reference {
            let path = reference.rsplit('#').next().unwrap_or(reference);
            let Some(target) = nav.find_path(path) else {
                return Ok(Vec::new());
            };
            return Ok(nav
                .child_by_name(target, name)
                .map(|index| Position {
                    profile: position.profile.clone(),
                    index,
                    type_filter: None,
                })
                .into_iter()
                .collect());
        }

        let mut found = Vec::new();
        for url in self.type_profiles(position) {
            let profile = self.fetch(&url).await?;
            let nav = ElementNavigator::new(profile.elements());
            if let Some(index) = nav.child_by_name(0, name) {
                found.push(Position {
                    profile: Some(profile.clone()),
                    index,
                    type_filter: None,
                });
            }
        }
        Ok(found)
    }

    async fn resolve(&self, position: &Position) -> Result<Vec<Position>> {
        let element = self.element(position);
        let mut targets: Vec<String> = element
            .types
            .iter()
            .filter(|t| t.code.as_deref() == Some("Reference"))
            .flat_map(|t| t.target_profile.iter().cloned())
            .collect();
        if targets.is_empty() {
            targets.push(self.ctx.settings.type_canonical("Resource"));
        }

        let mut found = Vec::new();
        for url in targets {
            found.push(Self::at_root(self.fetch(&url).await?));
        }
        Ok(found)
    }

    async fn extension(&self, position: &Position, url: &str) -> Result<Vec<Position>> {
        let nav = self.navigator(position);
        if let Some(extension) = nav.child_by_name(position.index, "extension") {
            let matching = nav.member_slices(extension).into_iter().find(|&slice| {
                nav.element(slice)
                    .types
                    .iter()
                    .any(|t| t.profile.iter().any(|p| p == url))
            });
            if let Some(index) = matching {
                return Ok(vec![Position {
                    profile: position.profile.clone(),
                    index,
                    type_filter: None,
                }]);
            }
        }
        Ok(vec![Self::at_root(self.fetch(url).await?)])
    }
}
