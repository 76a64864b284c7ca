use std::collections::HashMap;

use oracle_core::{Address, OracleError};

/// Solidity `abi.encodePacked` encoding for the subset of types this system
/// needs. `string` is raw UTF-8 bytes with no length prefix; `uint256` /
/// `uint64` are 32-byte big-endian left-padded; `bytes32` is 32 bytes
/// verbatim; `address` is the 20-byte value left-padded to 32 bytes.
///
/// Any other type name is a programmer error (`UnsupportedType`, fatal for
/// the request that triggered it).
#[derive(Clone, Debug, PartialEq)]
pub enum PackedValue {
    String(String),
    Uint256(u128),
    Bytes32([u8; 32]),
    Address(Address),
}

/// 32-byte big-endian, left-padded encoding of a `uint256`/`uint64` value.
pub fn pack_uint256(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Left-pad a 20-byte address to 32 bytes, as Solidity does for `address` in
/// `abi.encodePacked`.
pub fn pack_address(addr: &Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.as_bytes());
    out
}

/// Pack a single typed value according to its declared solidity type name.
pub fn pack_value(solidity_type: &str, value: &PackedValue) -> Result<Vec<u8>, OracleError> {
    match (solidity_type, value) {
        ("string", PackedValue::String(s)) => Ok(s.as_bytes().to_vec()),
        ("uint256", PackedValue::Uint256(v)) | ("uint64", PackedValue::Uint256(v)) => {
            Ok(pack_uint256(*v).to_vec())
        }
        ("bytes32", PackedValue::Bytes32(b)) => Ok(b.to_vec()),
        ("address", PackedValue::Address(a)) => Ok(pack_address(a).to_vec()),
        (other, _) => Err(OracleError::UnsupportedType(other.to_string())),
    }
}

/// Pack an ordered list of `(type, value)` pairs and concatenate the result,
/// matching Solidity `abi.encodePacked(types, values)` byte for byte.
pub fn pack_all(
    types: &[&str],
    values: &[PackedValue],
) -> Result<Vec<u8>, OracleError> {
    let mut out = Vec::new();
    for (t, v) in types.iter().zip(values.iter()) {
        out.extend(pack_value(t, v)?);
    }
    Ok(out)
}

/// Builds a `SignRequest`'s `data` array from a declared schema
/// (`structure`/`meta`, same length) and a table of observed field values:
/// `data[i] = values[meta[i]]` in schema order. Each value is validated
/// against its declared solidity type via `pack_value` before being
/// serialized, so a mistyped or unsupported field fails here rather than
/// silently corrupting the hash the on-chain verifier checks against.
pub fn build_message_data(
    structure: &[String],
    meta: &[String],
    values: &HashMap<String, PackedValue>,
) -> Result<Vec<serde_json::Value>, OracleError> {
    if structure.len() != meta.len() {
        return Err(OracleError::Config(
            "data_structure and data_structure_meta must be the same length".into(),
        ));
    }

    let ordered: Vec<PackedValue> = meta
        .iter()
        .map(|name| {
            values
                .get(name)
                .cloned()
                .ok_or_else(|| OracleError::Config(format!("missing observed value for field {name}")))
        })
        .collect::<Result<_, _>>()?;

    let types: Vec<&str> = structure.iter().map(String::as_str).collect();
    pack_all(&types, &ordered)?;

    Ok(ordered.iter().map(packed_value_to_json).collect())
}

fn packed_value_to_json(value: &PackedValue) -> serde_json::Value {
    match value {
        PackedValue::String(s) => serde_json::Value::String(s.clone()),
        PackedValue::Uint256(n) => serde_json::Value::String(n.to_string()),
        PackedValue::Bytes32(b) => serde_json::Value::String(format!("0x{}", hex::encode(b))),
        PackedValue::Address(a) => serde_json::Value::String(a.to_hex()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint256_is_32_bytes_big_endian_left_padded() {
        let packed = pack_uint256(1);
        assert_eq!(packed.len(), 32);
        assert_eq!(packed[31], 1);
        assert!(packed[..31].iter().all(|&b| b == 0));
    }

    #[test]
    fn string_has_no_length_prefix() {
        let packed = pack_value("string", &PackedValue::String("hi".into())).unwrap();
        assert_eq!(packed, b"hi".to_vec());
    }

    #[test]
    fn address_is_left_padded_to_32_bytes() {
        let addr = Address::from_bytes([0x11; 20]);
        let packed = pack_address(&addr);
        assert_eq!(packed.len(), 32);
        assert!(packed[..12].iter().all(|&b| b == 0));
        assert_eq!(&packed[12..], addr.as_bytes());
    }

    #[test]
    fn unsupported_type_is_an_error() {
        let err = pack_value("int128", &PackedValue::Uint256(1)).unwrap_err();
        assert!(matches!(err, OracleError::UnsupportedType(_)));
    }

    #[test]
    fn pack_all_concatenates_in_schema_order() {
        let types = ["uint256", "string"];
        let values = [PackedValue::Uint256(1), PackedValue::String("hi".into())];
        let packed = pack_all(&types, &values).unwrap();
        assert_eq!(packed.len(), 32 + 2);
        assert_eq!(packed[31], 1);
        assert_eq!(&packed[32..], b"hi");
    }

    #[test]
    fn pack_all_stops_at_the_shorter_of_types_or_values() {
        let types = ["uint256"];
        let values = [PackedValue::Uint256(1), PackedValue::String("unused".into())];
        let packed = pack_all(&types, &values).unwrap();
        assert_eq!(packed.len(), 32);
    }

    #[test]
    fn pack_all_propagates_an_unsupported_type_from_any_field() {
        let types = ["uint256", "int128"];
        let values = [PackedValue::Uint256(1), PackedValue::Uint256(2)];
        let err = pack_all(&types, &values).unwrap_err();
        assert!(matches!(err, OracleError::UnsupportedType(_)));
    }

    #[test]
    fn build_message_data_orders_values_by_meta_and_serializes_numbers_as_decimal_strings() {
        let structure = vec!["uint256".to_string(), "string".to_string()];
        let meta = vec!["price".to_string(), "ticker".to_string()];
        let mut values = HashMap::new();
        values.insert("price".to_string(), PackedValue::Uint256(100_000_000_000_000_000_000));
        values.insert("ticker".to_string(), PackedValue::String("BTC".into()));

        let data = build_message_data(&structure, &meta, &values).unwrap();
        assert_eq!(
            data,
            vec![
                serde_json::Value::String("100000000000000000000".into()),
                serde_json::Value::String("BTC".into()),
            ]
        );
    }

    #[test]
    fn build_message_data_rejects_mismatched_schema_lengths() {
        let structure = vec!["uint256".to_string()];
        let meta = vec!["price".to_string(), "ticker".to_string()];
        let err = build_message_data(&structure, &meta, &HashMap::new()).unwrap_err();
        assert!(matches!(err, OracleError::Config(_)));
    }

    #[test]
    fn build_message_data_rejects_a_missing_field() {
        let structure = vec!["uint256".to_string()];
        let meta = vec!["price".to_string()];
        let err = build_message_data(&structure, &meta, &HashMap::new()).unwrap_err();
        assert!(matches!(err, OracleError::Config(_)));
    }

    #[test]
    fn build_message_data_rejects_an_unsupported_type() {
        let structure = vec!["int128".to_string()];
        let meta = vec!["price".to_string()];
        let mut values = HashMap::new();
        values.insert("price".to_string(), PackedValue::Uint256(1));
        let err = build_message_data(&structure, &meta, &values).unwrap_err();
        assert!(matches!(err, OracleError::UnsupportedType(_)));
    }
}
