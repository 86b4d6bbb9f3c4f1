// =============================================================================
// Response envelope — `{"OK": bool, "Resposta": ...}`
// =============================================================================

use serde::Serialize;
use utoipa::ToSchema;

/// Wrapper every API route responds with. Field names are part of the wire
/// contract existing clients rely on.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Envelope<T> {
    #[serde(rename = "OK")]
    pub ok: bool,
    #[serde(rename = "Resposta")]
    pub resposta: T,
}

impl<T> Envelope<T> {
    pub fn success(payload: T) -> Self {
        Self {
            ok: true,
            resposta: payload,
        }
    }

    pub fn failure(detail: T) -> Self {
        Self {
            ok: false,
            resposta: detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_with_wire_names() {
        let json = serde_json::to_value(Envelope::success(vec![1, 2])).unwrap();
        assert_eq!(json, serde_json::json!({ "OK": true, "Resposta": [1, 2] }));
    }
}
