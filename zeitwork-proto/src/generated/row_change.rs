// This file mirrors the teacher's convention of checking in generated gRPC
// types under `src/generated/` (see `shuttle-proto`). There is no toolchain
// access to `protoc` in this workspace, so the `prost::Message` impl below
// is maintained by hand against the wire shape described in spec §4.5/§6
// rather than regenerated from a `.proto` file; the field numbers must not
// change once published.

/// The payload carried by every `<relation>.<created|updated>` subject
/// (spec §6): a relation name and the id of the row that changed. Consumers
/// always re-read the row before acting (spec §9 — "CDC → pub/sub is
/// advisory, not load-bearing for correctness").
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RowChangeEvent {
    #[prost(string, tag = "1")]
    pub relation: prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub row_id: prost::alloc::string::String,
    #[prost(enumeration = "ChangeKind", tag = "3")]
    pub kind: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum ChangeKind {
    Created = 0,
    Updated = 1,
}
