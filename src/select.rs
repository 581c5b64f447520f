use crate::normalize::Prediction;

pub const MAX_PREDICTIONS: usize = 10;

// First ten predictions in feed order
pub fn first_predictions(predictions: &[Prediction]) -> Vec<Prediction> {
    predictions.iter().take(MAX_PREDICTIONS).cloned().collect()
}

// First ten predictions whose route number is exactly `route`. Non-matching entries
// don't count toward the ten.
pub fn first_predictions_for_route(predictions: &[Prediction], route: &str) -> Vec<Prediction> {
    predictions
        .iter()
        .filter(|p| p.route_number() == Some(route))
        .take(MAX_PREDICTIONS)
        .cloned()
        .collect()
}
