//! Slice group construction.

use tracing::debug;

use super::{Compilation, ConversionMode, SubschemaCollector, discriminator};
use crate::error::Result;
use crate::types::schema::{Assertion, Cardinality, SliceCase, SliceSpec, SlicingRules};
use crate::types::validation::IssueKind;

pub const CLOSED_GROUP_MESSAGE: &str = "Element does not match any slice and the group is closed.";

/// Build the slice assertion for the slice intro at `intro`.
///
/// Re-slices are not members of this group; they are built when their own
/// intro slice is converted.
pub(crate) async fn build_slice(
    ctx: &Compilation<'_>,
    intro: usize,
    collector: &mut SubschemaCollector,
) -> Result<Assertion> {
    let element = ctx.nav.element(intro);
    let Some(slicing) = &element.slicing else {
        return Ok(Assertion::success());
    };

    let rules = match slicing.rules.as_deref() {
        None => SlicingRules::Open,
        Some(text) => SlicingRules::parse_str(text)
            .ok_or_else(|| ctx.fault(element, format!("unknown slicing rules '{text}'")))?,
    };
    let ordered = slicing.ordered.unwrap_or(false);
    let discriminator_less = slicing.discriminator.is_empty();

    let mut cases = Vec::new();
    let mut explicit_default = None;

    for member in ctx.nav.member_slices(intro) {
        let slice = ctx.nav.element(member);
        let name = slice
            .slice_name
            .as_deref()
            .and_then(|n| n.rsplit('/').next())
            .unwrap_or_default()
            .to_string();

        let full = ctx
            .convert_element(member, ConversionMode::Full, collector)
            .await?;

        if name == ctx.settings.default_slice_name {
            explicit_default = Some(full.as_assertion());
            continue;
        }

        // Slice cardinality applies to the values assigned to the case
        let cardinality = Cardinality::from_definition(slice.min, slice.max.as_deref());
        let constraints: Vec<Assertion> = full
            .assertions
            .into_iter()
            .filter(|a| !matches!(a, Assertion::Cardinality(_)))
            .collect();

        let (condition, body) = if discriminator_less {
            (Assertion::all_of(constraints), Assertion::success())
        } else {
            let mut conditions = Vec::with_capacity(slicing.discriminator.len());
            for discriminator in &slicing.discriminator {
                conditions.push(discriminator::condition(ctx, member, discriminator).await?);
            }
            (Assertion::all_of(conditions), Assertion::all_of(constraints))
        };

        cases.push(SliceCase {
            name,
            condition,
            cardinality,
            body,
        });
    }

    let default = explicit_default.unwrap_or_else(|| match rules {
        SlicingRules::Closed => Assertion::failure(IssueKind::SliceNoMatch, CLOSED_GROUP_MESSAGE),
        SlicingRules::Open | SlicingRules::OpenAtEnd => Assertion::success(),
    });

    debug!(
        element = %element.id_or_path(),
        cases = cases.len(),
        ordered,
        "built slice group"
    );

    if cases.is_empty() {
        return Ok(default);
    }

    Ok(Assertion::Slice(SliceSpec {
        ordered,
        rules,
        cases,
        default: Box::new(default),
    }))
}
