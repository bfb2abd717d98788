use register_map::codec::{
    decode_bit, decode_words, encode_words, raw_from_scaled, scale_reading, DecodeError,
    EncodeError,
};
use register_map::{ByteOrder, DataType, Encoding, Region, RegisterDef, WordOrder};
use types::{RawValue, Reading};

fn enc(byte_order: ByteOrder, word_order: WordOrder) -> Encoding {
    Encoding {
        byte_order,
        word_order,
    }
}

#[test]
fn decode_16bit_types() {
    let e = Encoding::default();
    assert_eq!(
        decode_words(DataType::Uint16, e, &[0x0102]).expect("u16"),
        RawValue::U16(0x0102)
    );
    assert_eq!(
        decode_words(DataType::Int16, e, &[0xFFFB]).expect("i16"),
        RawValue::I16(-5)
    );
    // Little byte order swaps the bytes inside the word.
    let le = enc(ByteOrder::Little, WordOrder::Big);
    assert_eq!(
        decode_words(DataType::Uint16, le, &[0x0201]).expect("u16 le"),
        RawValue::U16(0x0102)
    );
}

#[test]
fn decode_32bit_types_honor_word_order() {
    let e = Encoding::default();
    // 21.5f32 is 0x41AC0000.
    assert_eq!(
        decode_words(DataType::Float32, e, &[0x41AC, 0x0000]).expect("f32"),
        RawValue::F32(21.5)
    );
    let swapped = enc(ByteOrder::Big, WordOrder::Little);
    assert_eq!(
        decode_words(DataType::Float32, swapped, &[0x0000, 0x41AC]).expect("f32 swapped"),
        RawValue::F32(21.5)
    );

    assert_eq!(
        decode_words(DataType::Uint32, e, &[0x0001, 0xE240]).expect("u32"),
        RawValue::U32(123_456)
    );
    assert_eq!(
        decode_words(DataType::Int32, e, &[0xFFFF, 0xFFFE]).expect("i32"),
        RawValue::I32(-2)
    );

    // Byte and word order combined.
    let both = enc(ByteOrder::Little, WordOrder::Little);
    assert_eq!(
        decode_words(DataType::Uint32, both, &[0x40E2, 0x0100]).expect("u32 both"),
        RawValue::U32(123_456)
    );
}

#[test]
fn decode_rejects_wrong_word_count() {
    let e = Encoding::default();
    let err = decode_words(DataType::Float32, e, &[0x41AC]).expect_err("short");
    assert!(matches!(err, DecodeError::WordCount { .. }));
    let err = decode_words(DataType::Bool, e, &[1]).expect_err("bit type");
    assert!(matches!(err, DecodeError::BitType(_)));
}

#[test]
fn decode_bit_maps_to_bool() {
    assert_eq!(decode_bit(true), RawValue::Bool(true));
    assert_eq!(decode_bit(false), RawValue::Bool(false));
}

#[test]
fn scale_offset_and_precision() {
    let def = RegisterDef::new("energy", "energy", 0, Region::Input, DataType::Uint32)
        .scale(0.1)
        .precision(1);
    assert_eq!(
        scale_reading(&def, RawValue::U32(4321)),
        Some(Reading::Number(432.1))
    );

    let def = RegisterDef::new("temp", "temp", 0, Region::Input, DataType::Int16)
        .scale(0.5)
        .offset(-10.0);
    assert_eq!(
        scale_reading(&def, RawValue::I16(30)),
        Some(Reading::Number(5.0))
    );

    // Precision rounding happens after scale/offset.
    let def = RegisterDef::new("t", "t", 0, Region::Input, DataType::Float32).precision(1);
    assert_eq!(
        scale_reading(&def, RawValue::F32(21.5499)),
        Some(Reading::Number(21.5))
    );
}

#[test]
fn non_finite_values_become_unavailable() {
    let def = RegisterDef::new("t", "t", 0, Region::Input, DataType::Float32);
    assert_eq!(scale_reading(&def, RawValue::F32(f32::NAN)), None);
    assert_eq!(scale_reading(&def, RawValue::F32(f32::INFINITY)), None);
}

#[test]
fn bools_pass_through_unscaled() {
    let def = RegisterDef::new("sw", "sw", 0, Region::Coil, DataType::Bool);
    assert_eq!(
        scale_reading(&def, RawValue::Bool(true)),
        Some(Reading::Bool(true))
    );
}

#[test]
fn encode_round_trips_through_decode() {
    let e = Encoding::default();
    let words = encode_words(DataType::Float32, e, 21.5).expect("encode f32");
    assert_eq!(words, vec![0x41AC, 0x0000]);

    let words = encode_words(DataType::Int16, e, -5.0).expect("encode i16");
    assert_eq!(words, vec![0xFFFB]);

    let swapped = enc(ByteOrder::Big, WordOrder::Little);
    let words = encode_words(DataType::Uint32, swapped, 123_456.0).expect("encode u32");
    assert_eq!(words, vec![0xE240, 0x0001]);
}

#[test]
fn encode_rejects_bad_values() {
    let e = Encoding::default();
    assert!(matches!(
        encode_words(DataType::Int16, e, 40_000.0),
        Err(EncodeError::OutOfRange { .. })
    ));
    assert!(matches!(
        encode_words(DataType::Uint16, e, -1.0),
        Err(EncodeError::OutOfRange { .. })
    ));
    assert!(matches!(
        encode_words(DataType::Uint16, e, f64::NAN),
        Err(EncodeError::NotFinite(_))
    ));
    assert!(matches!(
        encode_words(DataType::Bool, e, 1.0),
        Err(EncodeError::NotRegisterType(_))
    ));
}

#[test]
fn inverse_transform_undoes_scale_and_offset() {
    let def = RegisterDef::new("sp", "sp", 0, Region::Holding, DataType::Int16)
        .scale(0.1)
        .offset(-5.0);
    let raw = raw_from_scaled(&def, 16.3);
    assert!((raw - 213.0).abs() < 1e-9);
}
