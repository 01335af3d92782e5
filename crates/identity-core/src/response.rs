use indexmap::IndexSet;

use crate::errors::ResolveError;
use crate::expand::Cluster;
use crate::types::ConsolidatedIdentity;

/// Project a single-primary cluster into its consolidated identity.
///
/// Emails and phones are distinct, in first-seen order, with the primary's
/// own value moved to the front.
pub fn build(cluster: &Cluster) -> Result<ConsolidatedIdentity, ResolveError> {
    let primary = cluster.sole_primary()?;

    let emails = primary_first(
        cluster.members().iter().filter_map(|c| c.email.as_deref()),
        primary.email.as_deref(),
        "email",
    )?;
    let phones = primary_first(
        cluster.members().iter().filter_map(|c| c.phone_number.as_deref()),
        primary.phone_number.as_deref(),
        "phone",
    )?;

    Ok(ConsolidatedIdentity {
        primary_id: primary.id,
        emails,
        phones,
        secondary_ids: cluster.secondaries().map(|c| c.id).collect(),
    })
}

fn primary_first<'a>(
    values: impl Iterator<Item = &'a str>,
    primary_value: Option<&'a str>,
    field: &str,
) -> Result<Vec<String>, ResolveError> {
    let distinct: IndexSet<&str> = values.collect();

    let Some(first) = primary_value else {
        return Ok(distinct.into_iter().map(str::to_owned).collect());
    };
    if !distinct.contains(first) {
        return Err(ResolveError::invariant(format!(
            "primary {field} {first:?} missing from its own cluster"
        )));
    }

    Ok(std::iter::once(first)
        .chain(distinct.into_iter().filter(|v| *v != first))
        .map(str::to_owned)
        .collect())
}
