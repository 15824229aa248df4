//! Companion wire protocol.
//!
//! Four messages share one positional binary encoding: fields are written
//! in a fixed order and width with no tags or versioning, so producer and
//! consumer must agree on the layout below.
//!
//! ```text
//! SpawnBroadcast   varint entity_id | uuid | f64 x,y,z | i16 vx,vy,vz
//!                  | u8 pitch | u8 yaw | descriptor | bytes inventory
//! DismissBroadcast varint entity_id
//! SpawnRequest     descriptor
//! DespawnRequest   descriptor
//!
//! descriptor       string name | string short_name | string description
//!                  | string skin_url | string extra (JSON object)
//! inventory        u8 selected_slot | u8 n | n x (u8 slot | string item | u8 count)
//! ```
//!
//! Each message travels on its own channel; a [`Frame`] prefixes the payload
//! with the channel id so several channels can share one byte stream.

mod buf;

#[cfg(test)]
mod tests;

pub use buf::{PacketReader, PacketWriter, MAX_BLOB_LEN, MAX_STRING_LEN};

use crate::descriptor::CharacterDescriptor;
use crate::inventory::{Inventory, ItemStack, SLOT_COUNT};
use crate::simulation::{Agent, AgentIdentity, Pose, Vec3};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Velocity components are clamped to +/- this many blocks per tick
pub const VELOCITY_LIMIT: f64 = 3.9;

/// Fixed-point scale for velocity components
pub const VELOCITY_SCALE: f64 = 8000.0;

/// Degrees represented by one step of a packed angle
pub const ANGLE_STEP: f32 = 360.0 / 256.0;

/// Errors raised while decoding a wire payload
#[derive(Debug, Clone, PartialEq)]
pub enum WireError {
    /// Buffer ended before a field was complete
    Truncated { needed: usize, remaining: usize },
    /// Varint continued past five bytes
    VarIntTooLong,
    /// Length prefix negative or above the limit
    LengthOutOfRange { len: i64, max: usize },
    InvalidUtf8,
    /// Inventory slot index outside the grid
    InvalidSlot(u8),
    /// Field decoded but its content is unusable
    Malformed(String),
    UnknownChannel(String),
    /// Payload arrived on a channel the receiver does not handle
    UnexpectedChannel(Channel),
    /// Bytes left over after the last field
    TrailingBytes(usize),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated { needed, remaining } => {
                write!(f, "truncated payload: needed {} bytes, {} remaining", needed, remaining)
            }
            WireError::VarIntTooLong => write!(f, "varint is longer than 5 bytes"),
            WireError::LengthOutOfRange { len, max } => {
                write!(f, "length prefix {} outside 0..={}", len, max)
            }
            WireError::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            WireError::InvalidSlot(slot) => write!(f, "inventory slot {} out of range", slot),
            WireError::Malformed(e) => write!(f, "malformed field: {}", e),
            WireError::UnknownChannel(id) => write!(f, "unknown channel '{}'", id),
            WireError::UnexpectedChannel(channel) => write!(f, "unexpected message on channel '{}'", channel.id()),
            WireError::TrailingBytes(n) => write!(f, "{} trailing bytes after payload", n),
        }
    }
}

impl std::error::Error for WireError {}

/// Channel a message travels on; one per message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Authority -> observers
    SpawnBroadcast,
    /// Authority -> observers
    DismissBroadcast,
    /// Observer -> authority
    SpawnRequest,
    /// Observer -> authority
    DespawnRequest,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::SpawnBroadcast,
        Channel::DismissBroadcast,
        Channel::SpawnRequest,
        Channel::DespawnRequest,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Channel::SpawnBroadcast => "retinue:spawn_companion",
            Channel::DismissBroadcast => "retinue:dismiss_companion",
            Channel::SpawnRequest => "retinue:request_spawn_companion",
            Channel::DespawnRequest => "retinue:request_despawn_companion",
        }
    }

    pub fn from_id(id: &str) -> Result<Self, WireError> {
        Channel::ALL
            .into_iter()
            .find(|c| c.id() == id)
            .ok_or_else(|| WireError::UnknownChannel(id.to_string()))
    }
}

/// Full state of a companion as announced to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnBroadcast {
    pub entity_id: i32,
    pub uuid: Uuid,
    pub position: Vec3,
    pub velocity: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub descriptor: CharacterDescriptor,
    pub inventory: Inventory,
}

impl SpawnBroadcast {
    /// Capture a live agent's state; `None` until the agent has an entity id.
    pub fn from_agent(agent: &Agent) -> Option<Self> {
        let identity = agent.identity();
        Some(Self {
            entity_id: identity.entity_id?,
            uuid: identity.uuid,
            position: agent.pose.position,
            velocity: agent.pose.velocity,
            pitch: agent.pose.pitch,
            yaw: agent.pose.yaw,
            descriptor: agent.descriptor().clone(),
            inventory: agent.inventory.clone(),
        })
    }

    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            uuid: self.uuid,
            entity_id: Some(self.entity_id),
        }
    }

    /// Build the render-only local copy of the announced companion.
    pub fn into_shadow(self) -> Agent {
        let pose = Pose {
            position: self.position,
            velocity: self.velocity,
            pitch: self.pitch,
            yaw: self.yaw,
        };
        Agent::shadow(self.identity(), self.descriptor, pose, self.inventory)
    }

    fn write(&self, w: &mut PacketWriter) {
        w.write_varint(self.entity_id);
        w.write_uuid(self.uuid);
        w.write_f64(self.position.x);
        w.write_f64(self.position.y);
        w.write_f64(self.position.z);
        w.write_i16(pack_velocity(self.velocity.x));
        w.write_i16(pack_velocity(self.velocity.y));
        w.write_i16(pack_velocity(self.velocity.z));
        w.write_u8(pack_angle(self.pitch));
        w.write_u8(pack_angle(self.yaw));
        write_descriptor(w, &self.descriptor);
        w.write_bytes(&encode_inventory(&self.inventory));
    }

    fn read(r: &mut PacketReader<'_>) -> Result<Self, WireError> {
        let entity_id = r.read_varint()?;
        let uuid = r.read_uuid()?;
        let position = Vec3::new(r.read_f64()?, r.read_f64()?, r.read_f64()?);
        let velocity = Vec3::new(
            unpack_velocity(r.read_i16()?),
            unpack_velocity(r.read_i16()?),
            unpack_velocity(r.read_i16()?),
        );
        let pitch = unpack_angle(r.read_u8()?);
        let yaw = unpack_angle(r.read_u8()?);
        let descriptor = read_descriptor(r)?;
        let inventory = decode_inventory(r.read_bytes()?)?;

        Ok(Self {
            entity_id,
            uuid,
            position,
            velocity,
            pitch,
            yaw,
            descriptor,
            inventory,
        })
    }
}

/// Messages exchanged between the authority and observers
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    SpawnBroadcast(SpawnBroadcast),
    /// Companion with this entity id left the simulation
    DismissBroadcast { entity_id: i32 },
    /// Bind the described companion to the sender
    SpawnRequest { descriptor: CharacterDescriptor },
    /// Unbind the sender's companion with this descriptor's name
    DespawnRequest { descriptor: CharacterDescriptor },
}

impl WireMessage {
    pub fn channel(&self) -> Channel {
        match self {
            WireMessage::SpawnBroadcast(_) => Channel::SpawnBroadcast,
            WireMessage::DismissBroadcast { .. } => Channel::DismissBroadcast,
            WireMessage::SpawnRequest { .. } => Channel::SpawnRequest,
            WireMessage::DespawnRequest { .. } => Channel::DespawnRequest,
        }
    }

    /// Encode the payload (without channel id).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PacketWriter::new();
        match self {
            WireMessage::SpawnBroadcast(broadcast) => broadcast.write(&mut w),
            WireMessage::DismissBroadcast { entity_id } => w.write_varint(*entity_id),
            WireMessage::SpawnRequest { descriptor } | WireMessage::DespawnRequest { descriptor } => {
                write_descriptor(&mut w, descriptor)
            }
        }
        w.into_inner()
    }

    /// Decode a payload received on `channel`.
    ///
    /// The whole payload must be consumed; leftovers indicate a layout
    /// mismatch and are rejected.
    pub fn decode(channel: Channel, payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PacketReader::new(payload);
        let message = match channel {
            Channel::SpawnBroadcast => WireMessage::SpawnBroadcast(SpawnBroadcast::read(&mut r)?),
            Channel::DismissBroadcast => WireMessage::DismissBroadcast {
                entity_id: r.read_varint()?,
            },
            Channel::SpawnRequest => WireMessage::SpawnRequest {
                descriptor: read_descriptor(&mut r)?,
            },
            Channel::DespawnRequest => WireMessage::DespawnRequest {
                descriptor: read_descriptor(&mut r)?,
            },
        };
        r.finish()?;
        Ok(message)
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            channel: self.channel(),
            payload: self.encode(),
        }
    }
}

/// Channel id plus payload, for transports that multiplex channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

impl Frame {
    /// `string channel_id` followed by the raw payload
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PacketWriter::new();
        w.write_string(self.channel.id());
        w.write_raw(&self.payload);
        w.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = PacketReader::new(bytes);
        let channel = Channel::from_id(&r.read_string()?)?;
        Ok(Self {
            channel,
            payload: r.read_rest().to_vec(),
        })
    }

    pub fn message(&self) -> Result<WireMessage, WireError> {
        WireMessage::decode(self.channel, &self.payload)
    }
}

/// Pack degrees into one byte (`round(deg * 256 / 360)`, wrapping).
pub fn pack_angle(degrees: f32) -> u8 {
    (degrees * 256.0 / 360.0).round() as i32 as u8
}

/// Unpack a byte angle into degrees in `[-180, 180)`.
pub fn unpack_angle(packed: u8) -> f32 {
    f32::from(packed as i8) * 360.0 / 256.0
}

/// Clamp and scale a velocity component into 16-bit fixed point.
pub fn pack_velocity(component: f64) -> i16 {
    (component.clamp(-VELOCITY_LIMIT, VELOCITY_LIMIT) * VELOCITY_SCALE).round() as i16
}

pub fn unpack_velocity(packed: i16) -> f64 {
    f64::from(packed) / VELOCITY_SCALE
}

fn write_descriptor(w: &mut PacketWriter, descriptor: &CharacterDescriptor) {
    w.write_string(&descriptor.name);
    w.write_string(&descriptor.short_name);
    w.write_string(&descriptor.description);
    w.write_string(&descriptor.skin_url);
    w.write_string(&Value::Object(descriptor.extra.clone()).to_string());
}

fn read_descriptor(r: &mut PacketReader<'_>) -> Result<CharacterDescriptor, WireError> {
    let name = r.read_string()?;
    let short_name = r.read_string()?;
    let description = r.read_string()?;
    let skin_url = r.read_string()?;
    let extra = r.read_string()?;
    let extra: Map<String, Value> = if extra.is_empty() {
        Map::new()
    } else {
        serde_json::from_str(&extra).map_err(|e| WireError::Malformed(format!("descriptor extra: {}", e)))?
    };

    Ok(CharacterDescriptor {
        name,
        short_name,
        description,
        skin_url,
        extra,
    })
}

fn encode_inventory(inventory: &Inventory) -> Vec<u8> {
    let mut w = PacketWriter::new();
    let occupied: Vec<(usize, &ItemStack)> = inventory.occupied().collect();
    w.write_u8(inventory.selected_slot() as u8);
    w.write_u8(occupied.len() as u8);
    for (slot, stack) in occupied {
        w.write_u8(slot as u8);
        w.write_string(&stack.item);
        w.write_u8(stack.count);
    }
    w.into_inner()
}

fn decode_inventory(blob: &[u8]) -> Result<Inventory, WireError> {
    let mut r = PacketReader::new(blob);
    let mut inventory = Inventory::new();

    let selected = r.read_u8()?;
    if usize::from(selected) >= SLOT_COUNT {
        return Err(WireError::InvalidSlot(selected));
    }
    inventory.select(usize::from(selected));

    let count = r.read_u8()?;
    for _ in 0..count {
        let slot = r.read_u8()?;
        if usize::from(slot) >= SLOT_COUNT {
            return Err(WireError::InvalidSlot(slot));
        }
        let item = r.read_string()?;
        let count = r.read_u8()?;
        inventory.set(usize::from(slot), Some(ItemStack::new(item, count)));
    }

    r.finish()?;
    Ok(inventory)
}
