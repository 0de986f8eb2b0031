use std::collections::HashSet;

use crate::limits::*;
use crate::model::*;

use super::availability::is_busy;
use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start > span.end {
        return Err(EngineError::InvalidSpan {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_query_window(span: &Span) -> Result<(), EngineError> {
    validate_span(span)?;
    if span.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_plate(plate: &str) -> Result<(), EngineError> {
    if plate.trim().is_empty() {
        return Err(EngineError::Validation("plate must not be empty".into()));
    }
    if plate.len() > MAX_PLATE_LEN {
        return Err(EngineError::LimitExceeded("plate too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(field: &'static str, value: &str) -> Result<(), EngineError> {
    if value.len() > MAX_TEXT_LEN {
        return Err(EngineError::Validation(format!("{field} too long")));
    }
    Ok(())
}

pub(crate) fn validate_profile(profile: &VehicleProfile) -> Result<(), EngineError> {
    if profile.title.trim().is_empty() {
        return Err(EngineError::Validation("title must not be empty".into()));
    }
    validate_text("title", &profile.title)?;
    validate_text("description", &profile.description)?;
    validate_text("car_type", &profile.car_type)?;
    validate_text("gear", &profile.gear)?;
    validate_text("fuel", &profile.fuel)?;
    if profile.guarantee < 0 {
        return Err(EngineError::Validation("guarantee must not be negative".into()));
    }
    if profile.guarantee > MAX_AMOUNT_MILLIMES {
        return Err(EngineError::LimitExceeded("guarantee too large"));
    }
    Ok(())
}

pub(crate) fn validate_percentage(percentage: u8) -> Result<(), EngineError> {
    match percentage {
        30 | 50 | 100 => Ok(()),
        other => Err(EngineError::Validation(format!(
            "payment percentage must be 30, 50 or 100, got {other}"
        ))),
    }
}

pub(crate) fn validate_rating(draft: &RatingDraft) -> Result<(), EngineError> {
    if !(1..=5).contains(&draft.score) {
        return Err(EngineError::Validation(format!(
            "rating must be between 1 and 5, got {}",
            draft.score
        )));
    }
    if draft.full_name.trim().is_empty() {
        return Err(EngineError::Validation("full_name must not be empty".into()));
    }
    validate_text("full_name", &draft.full_name)?;
    validate_text("comment", &draft.comment)
}

pub(crate) fn validate_price(price: Millimes) -> Result<(), EngineError> {
    if price < 0 {
        return Err(EngineError::Validation("price must not be negative".into()));
    }
    if price > MAX_AMOUNT_MILLIMES {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    Ok(())
}

/// Fold the legacy `category` + `price` pair into the category list. Runs once,
/// at construction; after this only the list is consulted for new records.
pub(crate) fn normalize_categories(
    draft: &VehicleTypeDraft,
) -> Result<(Vec<RentalCategory>, Option<LegacyPricing>), EngineError> {
    let legacy = match (draft.category, draft.price) {
        (Some(category), Some(price)) => {
            validate_price(price)?;
            Some(LegacyPricing { category, price })
        }
        (Some(_), None) => {
            return Err(EngineError::Validation("category given without price".into()));
        }
        _ => None,
    };

    let mut categories: Vec<RentalCategory> = Vec::new();
    for c in &draft.categories {
        validate_price(c.price)?;
        match categories.iter_mut().find(|e| e.kind == c.kind) {
            Some(existing) => *existing = c.clone(),
            None => categories.push(c.clone()),
        }
    }

    if categories.is_empty() {
        match &legacy {
            Some(l) => categories.push(RentalCategory {
                kind: l.category,
                price: l.price,
                available: draft.available,
            }),
            None => {
                return Err(EngineError::Validation(
                    "either categories or category and price are required".into(),
                ));
            }
        }
    }
    Ok((categories, legacy))
}

/// Plates must be valid and distinct within the request.
pub(crate) fn validate_unit_drafts(units: &[UnitDraft]) -> Result<(), EngineError> {
    if units.len() > MAX_UNITS_PER_VEHICLE_TYPE {
        return Err(EngineError::LimitExceeded("too many units"));
    }
    let mut seen = HashSet::new();
    for u in units {
        validate_plate(&u.plate)?;
        if !seen.insert(u.plate.as_str()) {
            return Err(EngineError::AlreadyExists(format!("plate {}", u.plate)));
        }
    }
    Ok(())
}

/// The plate must belong to the fleet, be in service, and be free for `span`.
/// Caller holds the fleet write lock, so the answer stays true until it commits.
pub(crate) fn check_unit_free(fleet: &FleetState, plate: &str, span: Span) -> Result<(), EngineError> {
    let unit = fleet.vehicle_type.unit(plate).ok_or_else(|| {
        EngineError::NotFound(format!("plate {plate} in vehicle type {}", fleet.id()))
    })?;
    if !unit.available || is_busy(fleet, unit, span) {
        return Err(EngineError::Unavailable(plate.to_string()));
    }
    Ok(())
}
