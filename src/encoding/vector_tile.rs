//! Mapbox Vector Tile protobuf messages (`vector_tile.proto`, spec 2.1).
//!
//! Checked-in prost definitions: the schema is two messages and has been
//! frozen since 2016, so code generation at build time buys nothing.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Tile {
    #[prost(message, repeated, tag = "3")]
    pub layers: ::prost::alloc::vec::Vec<tile::Layer>,
}

pub mod tile {
    /// Variant type encoding typed property values.
    ///
    /// Exactly one of the fields is present in a well-formed value.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Value {
        #[prost(string, optional, tag = "1")]
        pub string_value: ::core::option::Option<::prost::alloc::string::String>,
        #[prost(float, optional, tag = "2")]
        pub float_value: ::core::option::Option<f32>,
        #[prost(double, optional, tag = "3")]
        pub double_value: ::core::option::Option<f64>,
        #[prost(int64, optional, tag = "4")]
        pub int_value: ::core::option::Option<i64>,
        #[prost(uint64, optional, tag = "5")]
        pub uint_value: ::core::option::Option<u64>,
        #[prost(sint64, optional, tag = "6")]
        pub sint_value: ::core::option::Option<i64>,
        #[prost(bool, optional, tag = "7")]
        pub bool_value: ::core::option::Option<bool>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Feature {
        #[prost(uint64, optional, tag = "1", default = "0")]
        pub id: ::core::option::Option<u64>,
        /// Pairs of indexes into the layer's `keys` and `values` tables.
        #[prost(uint32, repeated, tag = "2")]
        pub tags: ::prost::alloc::vec::Vec<u32>,
        #[prost(enumeration = "GeomType", optional, tag = "3", default = "Unknown")]
        pub r#type: ::core::option::Option<i32>,
        /// Zigzag-encoded command/parameter integer stream.
        #[prost(uint32, repeated, tag = "4")]
        pub geometry: ::prost::alloc::vec::Vec<u32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Layer {
        #[prost(uint32, required, tag = "15", default = "1")]
        pub version: u32,
        #[prost(string, required, tag = "1")]
        pub name: ::prost::alloc::string::String,
        #[prost(message, repeated, tag = "2")]
        pub features: ::prost::alloc::vec::Vec<Feature>,
        #[prost(string, repeated, tag = "3")]
        pub keys: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
        #[prost(message, repeated, tag = "4")]
        pub values: ::prost::alloc::vec::Vec<Value>,
        #[prost(uint32, optional, tag = "5", default = "4096")]
        pub extent: ::core::option::Option<u32>,
    }

    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum GeomType {
        Unknown = 0,
        Point = 1,
        Linestring = 2,
        Polygon = 3,
    }
}
