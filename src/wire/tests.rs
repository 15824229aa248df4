use super::*;
use serde_json::json;

fn descriptor() -> CharacterDescriptor {
    let mut descriptor = CharacterDescriptor::new("lumen", "Lumen")
        .with_description("A cheerful miner")
        .with_skin_url("https://cdn.example.com/skins/lumen.png");
    descriptor.extra.insert("greeting".to_string(), json!("Hi there!"));
    descriptor
}

fn broadcast() -> SpawnBroadcast {
    let mut inventory = Inventory::new();
    inventory.set(0, Some(ItemStack::new("iron_pickaxe", 1)));
    inventory.set(7, Some(ItemStack::new("torch", 32)));
    inventory.select(7);

    SpawnBroadcast {
        entity_id: 4242,
        uuid: Uuid::new_v4(),
        position: Vec3::new(128.5, 64.0, -33.25),
        velocity: Vec3::new(0.125, -0.0784, 1.3),
        pitch: -22.5,
        yaw: 271.0,
        descriptor: descriptor(),
        inventory,
    }
}

/// Smallest difference between two angles, in degrees
fn angle_delta(a: f32, b: f32) -> f32 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

#[test]
fn test_spawn_broadcast_round_trip() {
    let original = broadcast();
    let bytes = WireMessage::SpawnBroadcast(original.clone()).encode();

    let decoded = match WireMessage::decode(Channel::SpawnBroadcast, &bytes).unwrap() {
        WireMessage::SpawnBroadcast(b) => b,
        other => panic!("unexpected message {:?}", other),
    };

    assert_eq!(decoded.entity_id, original.entity_id);
    assert_eq!(decoded.uuid, original.uuid);
    assert_eq!(decoded.descriptor, original.descriptor);
    assert_eq!(decoded.inventory, original.inventory);
    assert_eq!(decoded.position, original.position);

    let step = 1.0 / VELOCITY_SCALE;
    assert!((decoded.velocity.x - original.velocity.x).abs() <= step);
    assert!((decoded.velocity.y - original.velocity.y).abs() <= step);
    assert!((decoded.velocity.z - original.velocity.z).abs() <= step);

    assert!(angle_delta(decoded.pitch, original.pitch) <= ANGLE_STEP);
    assert!(angle_delta(decoded.yaw, original.yaw) <= ANGLE_STEP);
}

#[test]
fn test_requests_round_trip() {
    for message in [
        WireMessage::SpawnRequest { descriptor: descriptor() },
        WireMessage::DespawnRequest { descriptor: descriptor() },
    ] {
        let decoded = WireMessage::decode(message.channel(), &message.encode()).unwrap();
        assert_eq!(decoded, message);
    }
}

#[test]
fn test_request_layout_is_positional() {
    let bytes = WireMessage::SpawnRequest {
        descriptor: CharacterDescriptor::new("ab", ""),
    }
    .encode();

    // name, short_name, description, skin_url, extra
    assert_eq!(bytes, vec![2, b'a', b'b', 0, 0, 0, 2, b'{', b'}']);
}

#[test]
fn test_velocity_is_clamped() {
    assert_eq!(pack_velocity(10.0), pack_velocity(VELOCITY_LIMIT));
    assert_eq!(pack_velocity(-10.0), pack_velocity(-VELOCITY_LIMIT));
    assert_eq!(pack_velocity(VELOCITY_LIMIT), 31_200);
    assert!((unpack_velocity(pack_velocity(-10.0)) + VELOCITY_LIMIT).abs() < 1e-9);
    assert_eq!(pack_velocity(f64::NAN), 0);
}

#[test]
fn test_angle_quantization() {
    assert_eq!(pack_angle(0.0), 0);
    assert_eq!(pack_angle(90.0), 64);
    assert_eq!(pack_angle(180.0), 128);
    assert_eq!(pack_angle(-90.0), 192);
    assert_eq!(unpack_angle(64), 90.0);
    assert_eq!(unpack_angle(192), -90.0);

    for degrees in [-179.0f32, -45.3, 0.7, 33.3, 359.9, 720.5] {
        assert!(angle_delta(unpack_angle(pack_angle(degrees)), degrees) <= ANGLE_STEP / 2.0 + 1e-3);
    }
}

#[test]
fn test_varint_encoding() {
    let cases: [(i32, &[u8]); 5] = [
        (0, &[0x00]),
        (1, &[0x01]),
        (127, &[0x7F]),
        (300, &[0xAC, 0x02]),
        (-1, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
    ];

    for (value, expected) in cases {
        let mut w = PacketWriter::new();
        w.write_varint(value);
        let bytes = w.into_inner();
        assert_eq!(bytes, expected);
        assert_eq!(PacketReader::new(&bytes).read_varint().unwrap(), value);
    }
}

#[test]
fn test_overlong_varint_rejected() {
    let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
    assert_eq!(PacketReader::new(&bytes).read_varint(), Err(WireError::VarIntTooLong));
}

#[test]
fn test_truncated_payloads_fail_cleanly() {
    let bytes = WireMessage::SpawnBroadcast(broadcast()).encode();

    // Every strict prefix must fail to decode without panicking
    for len in 0..bytes.len() {
        let result = WireMessage::decode(Channel::SpawnBroadcast, &bytes[..len]);
        assert!(result.is_err(), "prefix of {} bytes decoded", len);
    }
}

#[test]
fn test_garbage_payloads_fail_cleanly() {
    let garbage: [&[u8]; 4] = [
        &[0xFF; 3],
        &[0x05, 0xC3, 0x28, 0x00, 0x00, 0x00],
        &[0x7F, 0x01, 0x02],
        &[0xF0, 0xFF, 0xFF, 0xFF, 0x0F, 0x00],
    ];

    for channel in Channel::ALL {
        for bytes in garbage {
            assert!(WireMessage::decode(channel, bytes).is_err());
        }
    }
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = WireMessage::DespawnRequest { descriptor: descriptor() }.encode();
    bytes.push(0);

    assert_eq!(
        WireMessage::decode(Channel::DespawnRequest, &bytes),
        Err(WireError::TrailingBytes(1))
    );
}

#[test]
fn test_malformed_extra_rejected() {
    let mut w = PacketWriter::new();
    for field in ["lumen", "Lumen", "", "", "{not json"] {
        w.write_string(field);
    }

    let result = WireMessage::decode(Channel::SpawnRequest, &w.into_inner());
    assert!(matches!(result, Err(WireError::Malformed(_))));
}

#[test]
fn test_invalid_inventory_slot_rejected() {
    let mut b = broadcast();
    b.inventory = Inventory::new();
    let mut bytes = WireMessage::SpawnBroadcast(b).encode();

    // Inventory blob is the last field: [len=2, selected, count]
    let n = bytes.len();
    assert_eq!(&bytes[n - 3..], &[2, 0, 0]);
    bytes[n - 2] = SLOT_COUNT as u8;

    assert_eq!(
        WireMessage::decode(Channel::SpawnBroadcast, &bytes),
        Err(WireError::InvalidSlot(SLOT_COUNT as u8))
    );
}

#[test]
fn test_frame_round_trip() {
    let message = WireMessage::SpawnRequest { descriptor: descriptor() };
    let bytes = message.to_frame().encode();

    let frame = Frame::decode(&bytes).unwrap();
    assert_eq!(frame.channel, Channel::SpawnRequest);
    assert_eq!(frame.message().unwrap(), message);
}

#[test]
fn test_unknown_channel_rejected() {
    let mut w = PacketWriter::new();
    w.write_string("retinue:teleport_companion");

    assert_eq!(
        Frame::decode(&w.into_inner()),
        Err(WireError::UnknownChannel("retinue:teleport_companion".to_string()))
    );
}

#[test]
fn test_channel_ids_are_distinct() {
    for channel in Channel::ALL {
        assert_eq!(Channel::from_id(channel.id()).unwrap(), channel);
    }
}

#[test]
fn test_shadow_from_broadcast() {
    let b = broadcast();
    let shadow = b.clone().into_shadow();

    assert_eq!(shadow.identity(), b.identity());
    assert_eq!(shadow.descriptor(), &b.descriptor);
    assert!(shadow.owner().is_none());
    assert!(shadow.is_alive());
    assert_eq!(shadow.inventory.selected().unwrap().item, "torch");
}

#[test]
fn test_oversize_string_is_rejected_not_truncated() {
    let mut w = PacketWriter::new();
    w.write_string(&"é".repeat(MAX_STRING_LEN));
    let bytes = w.into_inner();

    assert!(matches!(
        PacketReader::new(&bytes).read_string(),
        Err(WireError::LengthOutOfRange { max: MAX_STRING_LEN, .. })
    ));
}

#[test]
fn test_descriptor_at_field_limit_roundtrips_exactly() {
    let mut b = broadcast();
    b.descriptor.description = "d".repeat(MAX_STRING_LEN);
    let lore = "l".repeat(MAX_STRING_LEN - 20);
    b.descriptor.extra.clear();
    b.descriptor.extra.insert("lore".to_string(), json!(lore));
    assert!(b.descriptor.validate().is_ok());

    let bytes = WireMessage::SpawnBroadcast(b.clone()).encode();
    let decoded = match WireMessage::decode(Channel::SpawnBroadcast, &bytes).unwrap() {
        WireMessage::SpawnBroadcast(decoded) => decoded,
        other => panic!("unexpected message {:?}", other),
    };

    assert_eq!(decoded.descriptor, b.descriptor);
}

#[test]
fn test_oversize_description_fails_to_decode() {
    let mut b = broadcast();
    b.descriptor.description = "d".repeat(MAX_STRING_LEN + 1);
    assert!(b.descriptor.validate().is_err());

    let bytes = WireMessage::SpawnBroadcast(b).encode();

    assert!(matches!(
        WireMessage::decode(Channel::SpawnBroadcast, &bytes),
        Err(WireError::LengthOutOfRange { .. })
    ));
}

#[test]
fn test_dismiss_broadcast_layout() {
    let message = WireMessage::DismissBroadcast { entity_id: 300 };
    let bytes = message.encode();

    assert_eq!(bytes, vec![0xAC, 0x02]);
    assert_eq!(
        WireMessage::decode(Channel::DismissBroadcast, &bytes).unwrap(),
        message
    );
}
