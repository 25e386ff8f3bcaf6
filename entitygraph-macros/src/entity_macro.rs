//! `#[derive(Entity)]`: generates the `Trackable`/`EntityFields`/`EntityMetadata`
//! impls a concrete entity's field struct needs to participate in the
//! identity map and relationship engine.
//!
//! Grounded in the teacher's `snug_macro.rs` attribute-parsing style
//! (`syn::meta::ParseNestedMeta` walking a flat `#[snugom(...)]` list) but
//! scaled to exactly the attributes `entitygraph::schema` declares — no
//! RediSearch index flags, no unique/cascade DSL.

use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Error, Fields, GenericArgument, Ident, LitStr, PathArguments, Result, Type};

struct EntityAttrs {
    type_name: String,
    create_input: String,
    update_input: String,
    short_repr: Vec<String>,
    subtypes: Vec<String>,
}

enum FieldKind {
    Id,
    Tracked { input_key: Option<String> },
    Plain,
    Relationship {
        target: Ident,
        target_field: String,
        query_field: String,
        is_list: bool,
        inverse_query_field: Option<String>,
        strategy: String,
    },
}

struct ParsedField {
    ident: Ident,
    ty: Type,
    kind: FieldKind,
}

pub fn expand(input: &DeriveInput) -> Result<TokenStream2> {
    let struct_name = &input.ident;
    let attrs = parse_entity_attrs(input)?;

    let Data::Struct(data) = &input.data else {
        return Err(Error::new_spanned(input, "#[derive(Entity)] only supports structs"));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(Error::new_spanned(input, "#[derive(Entity)] requires named fields"));
    };

    let mut fields = Vec::new();
    for field in &named.named {
        let ident = field.ident.clone().expect("named field");
        let kind = parse_field_kind(field)?;
        fields.push(ParsedField {
            ident,
            ty: field.ty.clone(),
            kind,
        });
    }

    let id_field = fields
        .iter()
        .find(|f| matches!(f.kind, FieldKind::Id))
        .ok_or_else(|| Error::new_spanned(input, "exactly one field must be marked #[entity(id)]"))?;
    let id_ident = &id_field.ident;

    let trackable_impl = emit_trackable(struct_name, &fields);
    let entity_fields_impl = emit_entity_fields(struct_name, id_ident, &fields);
    let metadata_impl = emit_entity_metadata(struct_name, &attrs, &fields);
    let accessors_impl = emit_accessors(struct_name, &fields);

    Ok(quote! {
        #trackable_impl
        #entity_fields_impl
        #metadata_impl
        #accessors_impl
    })
}

fn parse_entity_attrs(input: &DeriveInput) -> Result<EntityAttrs> {
    let mut type_name = None;
    let mut create_input = None;
    let mut update_input = None;
    let mut short_repr = Vec::new();
    let mut subtypes = Vec::new();

    for attr in &input.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("type_name") {
                type_name = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("create_input") {
                create_input = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("update_input") {
                update_input = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("short_repr") {
                let raw = meta.value()?.parse::<LitStr>()?.value();
                short_repr = raw.split(',').map(|s| s.trim().to_string()).collect();
            } else if meta.path.is_ident("subtypes") {
                let raw = meta.value()?.parse::<LitStr>()?.value();
                subtypes = raw.split(',').map(|s| s.trim().to_string()).collect();
            } else {
                return Err(meta.error("unrecognized #[entity(...)] struct attribute"));
            }
            Ok(())
        })?;
    }

    Ok(EntityAttrs {
        type_name: type_name.ok_or_else(|| Error::new_spanned(input, "#[entity(type_name = \"...\")] is required"))?,
        create_input: create_input
            .ok_or_else(|| Error::new_spanned(input, "#[entity(create_input = \"...\")] is required"))?,
        update_input: update_input
            .ok_or_else(|| Error::new_spanned(input, "#[entity(update_input = \"...\")] is required"))?,
        short_repr,
        subtypes,
    })
}

fn parse_field_kind(field: &syn::Field) -> Result<FieldKind> {
    let mut is_id = false;
    let mut is_tracked = false;
    let mut input_key = None;
    let mut is_relationship = false;
    let mut target = None;
    let mut target_field = None;
    let mut query_field = None;
    let mut is_list = false;
    let mut inverse_query_field = None;
    let mut strategy = "direct_field".to_string();

    for attr in &field.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                is_id = true;
            } else if meta.path.is_ident("tracked") {
                is_tracked = true;
            } else if meta.path.is_ident("input_key") {
                input_key = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("relationship") {
                is_relationship = true;
            } else if meta.path.is_ident("target") {
                target = Some(meta.value()?.parse::<Ident>()?);
            } else if meta.path.is_ident("target_field") {
                target_field = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("query_field") {
                query_field = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("list") {
                is_list = true;
            } else if meta.path.is_ident("inverse_query_field") {
                inverse_query_field = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("strategy") {
                strategy = meta.value()?.parse::<LitStr>()?.value();
            } else {
                return Err(meta.error("unrecognized #[entity(...)] field attribute"));
            }
            Ok(())
        })?;
    }

    if is_id {
        return Ok(FieldKind::Id);
    }
    if is_relationship {
        let target = target.ok_or_else(|| Error::new_spanned(field, "relationship field requires target = \"Peer\""))?;
        let field_name = field.ident.as_ref().unwrap().to_string();
        return Ok(FieldKind::Relationship {
            target,
            target_field: target_field.unwrap_or_else(|| field_name.clone()),
            query_field: query_field.unwrap_or(field_name),
            is_list,
            inverse_query_field,
            strategy,
        });
    }
    if is_tracked {
        return Ok(FieldKind::Tracked { input_key });
    }
    Ok(FieldKind::Plain)
}

/// Extracts `Peer` from a field declared as `FieldValue<Entity<Peer>>` or
/// `FieldValue<Vec<Entity<Peer>>>`.
fn relationship_inner_type(ty: &Type) -> Result<Type> {
    let Type::Path(path) = ty else {
        return Err(Error::new_spanned(ty, "relationship fields must be FieldValue<Entity<Peer>> or FieldValue<Vec<Entity<Peer>>>"));
    };
    let last = path.path.segments.last().unwrap();
    let PathArguments::AngleBracketed(args) = &last.arguments else {
        return Err(Error::new_spanned(ty, "expected FieldValue<...>"));
    };
    let GenericArgument::Type(inner) = args.args.first().unwrap() else {
        return Err(Error::new_spanned(ty, "expected a type argument"));
    };

    // inner is either `Entity<Peer>` or `Vec<Entity<Peer>>`.
    let unwrap_entity = |t: &Type| -> Result<Type> {
        let Type::Path(p) = t else {
            return Err(Error::new_spanned(t, "expected Entity<Peer>"));
        };
        let seg = p.path.segments.last().unwrap();
        let PathArguments::AngleBracketed(inner_args) = &seg.arguments else {
            return Err(Error::new_spanned(t, "expected Entity<Peer>"));
        };
        let GenericArgument::Type(peer) = inner_args.args.first().unwrap() else {
            return Err(Error::new_spanned(t, "expected a peer type"));
        };
        Ok(peer.clone())
    };

    if let Type::Path(p) = inner {
        if p.path.segments.last().unwrap().ident == "Vec" {
            let PathArguments::AngleBracketed(vec_args) = &p.path.segments.last().unwrap().arguments else {
                return Err(Error::new_spanned(ty, "expected Vec<Entity<Peer>>"));
            };
            let GenericArgument::Type(entity_ty) = vec_args.args.first().unwrap() else {
                return Err(Error::new_spanned(ty, "expected Entity<Peer> inside Vec"));
            };
            return unwrap_entity(entity_ty);
        }
    }
    unwrap_entity(inner)
}

fn emit_trackable(struct_name: &Ident, fields: &[ParsedField]) -> TokenStream2 {
    let entries = fields.iter().filter_map(|f| {
        let ident = &f.ident;
        let name = ident.to_string();
        match &f.kind {
            FieldKind::Tracked { .. } => Some(quote! {
                map.insert(#name.to_string(), ::entitygraph::snapshot::SnapshotValue::from_field(&self.#ident));
            }),
            FieldKind::Relationship { is_list, .. } => {
                if *is_list {
                    Some(quote! {
                        map.insert(#name.to_string(), ::entitygraph::snapshot::SnapshotValue::from_entity_list_field(&self.#ident));
                    })
                } else {
                    Some(quote! {
                        map.insert(#name.to_string(), ::entitygraph::snapshot::SnapshotValue::from_entity_field(&self.#ident));
                    })
                }
            }
            _ => None,
        }
    });

    quote! {
        impl ::entitygraph::snapshot::Trackable for #struct_name {
            fn encode_tracked_fields(&self) -> ::std::collections::HashMap<String, ::entitygraph::snapshot::SnapshotValue> {
                let mut map = ::std::collections::HashMap::new();
                #(#entries)*
                map
            }
        }
    }
}

fn emit_entity_fields(struct_name: &Ident, id_ident: &Ident, fields: &[ParsedField]) -> TokenStream2 {
    let input_value_arms = fields.iter().filter_map(|f| {
        let ident = &f.ident;
        let name = ident.to_string();
        match &f.kind {
            FieldKind::Tracked { .. } | FieldKind::Plain => Some(quote! {
                #name => self.#ident.as_ref().map(|v| ::serde_json::to_value(v).unwrap_or(::serde_json::Value::Null)),
            }),
            FieldKind::Relationship { is_list, .. } => {
                if *is_list {
                    Some(quote! {
                        #name => self.#ident.as_ref().map(|peers| {
                            let ids: Vec<::serde_json::Value> = peers.iter()
                                .filter_map(|p| p.id())
                                .map(::serde_json::Value::String)
                                .collect();
                            ::serde_json::Value::Array(ids)
                        }),
                    })
                } else {
                    Some(quote! {
                        #name => self.#ident.as_ref().map(|peer| {
                            peer.id().map(::serde_json::Value::String).unwrap_or(::serde_json::Value::Null)
                        }),
                    })
                }
            }
            FieldKind::Id => None,
        }
    });

    // Every arm above yields a `FieldValue<Value>` directly (via `FieldValue::map`
    // on a `FieldValue<&T>` borrow); `input_value` just dispatches on name.

    let apply_arms = fields.iter().filter_map(|f| {
        let ident = &f.ident;
        let name = ident.to_string();
        match &f.kind {
            FieldKind::Tracked { .. } | FieldKind::Plain => Some(quote! {
                if let Some(raw) = payload.get(#name) {
                    self.#ident = ::entitygraph::field::FieldValue::deserialize_from_value(raw.clone())?;
                    received.insert(#name.to_string());
                }
            }),
            FieldKind::Relationship { query_field, is_list, target, .. } => {
                let query_field = query_field.as_str();
                if *is_list {
                    Some(quote! {
                        if let Some(::serde_json::Value::Array(items)) = payload.get(#query_field) {
                            let mut peers = Vec::with_capacity(items.len());
                            for item in items {
                                peers.push(store.materialize::<#target>(item.clone())?);
                            }
                            self.#ident = ::entitygraph::field::FieldValue::Value(peers);
                            received.insert(#name.to_string());
                        } else if let Some(::serde_json::Value::Null) = payload.get(#query_field) {
                            self.#ident = ::entitygraph::field::FieldValue::Null;
                            received.insert(#name.to_string());
                        }
                    })
                } else {
                    Some(quote! {
                        match payload.get(#query_field) {
                            Some(::serde_json::Value::Null) => {
                                self.#ident = ::entitygraph::field::FieldValue::Null;
                                received.insert(#name.to_string());
                            }
                            Some(other) => {
                                self.#ident = ::entitygraph::field::FieldValue::Value(store.materialize::<#target>(other.clone())?);
                                received.insert(#name.to_string());
                            }
                            None => {}
                        }
                    })
                }
            }
            FieldKind::Id => None,
        }
    });

    let related_arms = fields.iter().filter_map(|f| {
        let ident = &f.ident;
        let name = ident.to_string();
        match &f.kind {
            FieldKind::Relationship { is_list, .. } => {
                if *is_list {
                    Some(quote! {
                        #name => self.#ident.as_ref().into_option()
                            .map(|peers| peers.iter().map(|p| p.as_erased()).collect())
                            .unwrap_or_default(),
                    })
                } else {
                    Some(quote! {
                        #name => self.#ident.as_ref().into_option()
                            .map(|peer| vec![peer.as_erased()])
                            .unwrap_or_default(),
                    })
                }
            }
            _ => None,
        }
    });

    // `mirror_link`/`mirror_unlink` let the *other* side of a bidirectional
    // relationship push an edit onto this struct's own field by name, without
    // needing to know this struct's concrete type beyond the boxed `Entity<Self>`
    // handle it already holds (spec §4.6 "both-sides maintenance").
    let mirror_link_arms = fields.iter().filter_map(|f| {
        let ident = &f.ident;
        let name = ident.to_string();
        match &f.kind {
            FieldKind::Relationship { target, is_list, .. } => {
                if *is_list {
                    Some(quote! {
                        #name => {
                            let Ok(peer) = peer.downcast::<::entitygraph::entity::Entity<#target>>() else {
                                return false;
                            };
                            let peer = *peer;
                            let mut list = self.#ident.clone().into_option().unwrap_or_default();
                            if !list.iter().any(|existing| existing.id() == peer.id()) {
                                list.push(peer);
                            }
                            self.#ident = ::entitygraph::field::FieldValue::Value(list);
                            true
                        }
                    })
                } else {
                    Some(quote! {
                        #name => {
                            let Ok(peer) = peer.downcast::<::entitygraph::entity::Entity<#target>>() else {
                                return false;
                            };
                            self.#ident = ::entitygraph::field::FieldValue::Value(*peer);
                            true
                        }
                    })
                }
            }
            _ => None,
        }
    });

    let mirror_unlink_arms = fields.iter().filter_map(|f| {
        let ident = &f.ident;
        let name = ident.to_string();
        match &f.kind {
            FieldKind::Relationship { is_list, .. } => {
                if *is_list {
                    Some(quote! {
                        #name => {
                            let mut list = self.#ident.clone().into_option().unwrap_or_default();
                            list.retain(|existing| existing.id().as_deref() != Some(peer_id));
                            self.#ident = ::entitygraph::field::FieldValue::Value(list);
                            true
                        }
                    })
                } else {
                    Some(quote! {
                        #name => {
                            if self.#ident.as_ref().into_option().and_then(|p| p.id()).as_deref() == Some(peer_id) {
                                self.#ident = ::entitygraph::field::FieldValue::Null;
                            }
                            true
                        }
                    })
                }
            }
            _ => None,
        }
    });

    quote! {
        impl ::entitygraph::entity::EntityFields for #struct_name {
            fn id(&self) -> Option<&str> {
                self.#id_ident.as_deref()
            }

            fn set_id(&mut self, id: String) {
                self.#id_ident = Some(id);
            }

            fn input_value(&self, field: &str) -> ::entitygraph::field::FieldValue<::serde_json::Value> {
                match field {
                    #(#input_value_arms)*
                    _ => ::entitygraph::field::FieldValue::Unset,
                }
            }

            fn apply_payload(
                &mut self,
                payload: &::serde_json::Map<String, ::serde_json::Value>,
                store: &::entitygraph::store::Store,
            ) -> ::entitygraph::error::GraphResult<::std::collections::HashSet<String>> {
                let mut received = ::std::collections::HashSet::new();
                if let Some(::serde_json::Value::String(id)) = payload.get("id") {
                    self.#id_ident = Some(id.clone());
                }
                #(#apply_arms)*
                Ok(received)
            }

            fn related_erased(&self, field: &str) -> Vec<::std::sync::Arc<dyn ::entitygraph::entity::ErasedEntity>> {
                match field {
                    #(#related_arms)*
                    _ => Vec::new(),
                }
            }

            fn mirror_link(&mut self, field: &str, peer: Box<dyn ::std::any::Any + Send + Sync>) -> bool {
                match field {
                    #(#mirror_link_arms)*
                    _ => false,
                }
            }

            fn mirror_unlink(&mut self, field: &str, peer_id: &str) -> bool {
                match field {
                    #(#mirror_unlink_arms)*
                    _ => false,
                }
            }
        }
    }
}

fn emit_entity_metadata(struct_name: &Ident, attrs: &EntityAttrs, fields: &[ParsedField]) -> TokenStream2 {
    let type_name = &attrs.type_name;
    let create_input = &attrs.create_input;
    let update_input = &attrs.update_input;
    let short_repr = &attrs.short_repr;
    let subtypes = &attrs.subtypes;

    let field_descriptors = fields.iter().filter_map(|f| {
        let name = f.ident.to_string();
        match &f.kind {
            FieldKind::Tracked { input_key } => {
                let input_key = input_key.clone().unwrap_or_else(|| name.clone());
                Some(quote! {
                    ::entitygraph::schema::FieldDescriptor {
                        name: Box::leak(#name.to_string().into_boxed_str()),
                        input_key: Box::leak(#input_key.to_string().into_boxed_str()),
                        conversion: ::entitygraph::schema::FieldConversion::Identity,
                        tracked: true,
                    },
                })
            }
            FieldKind::Plain => Some(quote! {
                ::entitygraph::schema::FieldDescriptor {
                    name: Box::leak(#name.to_string().into_boxed_str()),
                    input_key: Box::leak(#name.to_string().into_boxed_str()),
                    conversion: ::entitygraph::schema::FieldConversion::Identity,
                    tracked: false,
                },
            }),
            _ => None,
        }
    });

    let relationship_descriptors = fields.iter().filter_map(|f| {
        let name = f.ident.to_string();
        match &f.kind {
            FieldKind::Relationship { target, target_field, query_field, is_list, inverse_query_field, strategy } => {
                let inverse_type = target.to_string();
                let inverse_query_field = match inverse_query_field {
                    Some(s) => quote! { Some(Box::leak(#s.to_string().into_boxed_str()) as &'static str) },
                    None => quote! { None },
                };
                let strategy_tokens = match strategy.as_str() {
                    "filter_query" => quote! { ::entitygraph::schema::QueryStrategy::FilterQuery },
                    _ => quote! { ::entitygraph::schema::QueryStrategy::DirectField },
                };
                Some(quote! {
                    ::entitygraph::schema::RelationshipMetadata {
                        field: Box::leak(#name.to_string().into_boxed_str()),
                        target_field: Box::leak(#target_field.to_string().into_boxed_str()),
                        query_field: Box::leak(#query_field.to_string().into_boxed_str()),
                        is_list: #is_list,
                        inverse_type: Box::leak(#inverse_type.to_string().into_boxed_str()),
                        inverse_query_field: #inverse_query_field,
                        query_strategy: #strategy_tokens,
                    },
                })
            }
            _ => None,
        }
    });

    quote! {
        impl ::entitygraph::schema::EntityMetadata for #struct_name {
            const TYPE_NAME: &'static str = #type_name;

            fn entity_descriptor() -> ::entitygraph::schema::EntityDescriptor {
                ::entitygraph::schema::EntityDescriptor {
                    type_name: #type_name,
                    create_input_type: #create_input,
                    update_input_type: #update_input,
                    fields: vec![#(#field_descriptors)*],
                    relationships: vec![#(#relationship_descriptors)*],
                    short_repr_fields: vec![#(#short_repr),*],
                    concrete_subtypes: vec![#(#subtypes),*],
                }
            }
        }
    }
}

/// Typed getter/setter accessors on `Entity<Self>`, so callers write
/// `scene.title()` / `scene.set_title(...)` instead of reaching through
/// `with_fields`/`with_fields_mut` directly.
fn emit_accessors(struct_name: &Ident, fields: &[ParsedField]) -> TokenStream2 {
    let methods = fields.iter().filter_map(|f| {
        let ident = &f.ident;
        let getter = ident.clone();
        let setter = format_ident!("set_{}", ident);
        match &f.kind {
            FieldKind::Id => None,
            FieldKind::Relationship { is_list, inverse_query_field, .. } => {
                let peer = relationship_inner_type(&f.ty).ok()?;
                let inverse_field_expr = match inverse_query_field {
                    Some(name) => quote! { Some(#name) },
                    None => quote! { None::<&'static str> },
                };

                if *is_list {
                    let add_to = format_ident!("add_to_{}", ident);
                    let remove_from = format_ident!("remove_from_{}", ident);
                    Some(quote! {
                        pub fn #getter(&self) -> ::entitygraph::field::FieldValue<Vec<::entitygraph::entity::Entity<#peer>>> {
                            self.with_fields(|f| f.#ident.clone())
                        }

                        /// Replaces the whole list, mirroring the add/remove diff onto
                        /// whichever peers are already loaded with their inverse field
                        /// received (spec §4.6 both-sides maintenance; never fetches).
                        pub fn #setter(&self, value: ::entitygraph::field::FieldValue<Vec<::entitygraph::entity::Entity<#peer>>>) {
                            let previous = self.with_fields(|f| f.#ident.clone()).into_option().unwrap_or_default();
                            let next = value.as_ref().into_option().map(|v| v.to_vec()).unwrap_or_default();
                            self.with_fields_mut(|f| f.#ident = value);
                            let inverse_field: Option<&'static str> = #inverse_field_expr;
                            if let Some(inverse_field) = inverse_field {
                                let self_id = self.id();
                                for old in previous.iter() {
                                    if !next.iter().any(|n| n.id() == old.id()) && old.has_received(inverse_field) {
                                        old.with_fields_mut(|pf| pf.mirror_unlink(inverse_field, self_id.as_deref().unwrap_or_default()));
                                    }
                                }
                                for new in next.iter() {
                                    if !previous.iter().any(|p| p.id() == new.id()) && new.has_received(inverse_field) {
                                        let boxed: Box<dyn ::std::any::Any + Send + Sync> = Box::new(self.clone());
                                        new.with_fields_mut(|pf| pf.mirror_link(inverse_field, boxed));
                                    }
                                }
                            }
                        }

                        /// Appends one peer, mirroring onto its inverse field if that
                        /// peer is already loaded with the inverse field received.
                        pub fn #add_to(&self, peer: ::entitygraph::entity::Entity<#peer>) {
                            let peer_id = peer.id();
                            self.with_fields_mut(|f| {
                                let mut list = f.#ident.clone().into_option().unwrap_or_default();
                                if !list.iter().any(|existing| existing.id() == peer_id) {
                                    list.push(peer.clone());
                                }
                                f.#ident = ::entitygraph::field::FieldValue::Value(list);
                            });
                            let inverse_field: Option<&'static str> = #inverse_field_expr;
                            if let Some(inverse_field) = inverse_field {
                                if peer.has_received(inverse_field) {
                                    let boxed: Box<dyn ::std::any::Any + Send + Sync> = Box::new(self.clone());
                                    peer.with_fields_mut(|pf| pf.mirror_link(inverse_field, boxed));
                                }
                            }
                        }

                        /// Removes one peer by id, mirroring onto its inverse field
                        /// under the same already-loaded condition as the adder.
                        pub fn #remove_from(&self, peer: &::entitygraph::entity::Entity<#peer>) {
                            let peer_id = peer.id();
                            self.with_fields_mut(|f| {
                                let mut list = f.#ident.clone().into_option().unwrap_or_default();
                                list.retain(|existing| existing.id() != peer_id);
                                f.#ident = ::entitygraph::field::FieldValue::Value(list);
                            });
                            let inverse_field: Option<&'static str> = #inverse_field_expr;
                            if let Some(inverse_field) = inverse_field {
                                if peer.has_received(inverse_field) {
                                    let self_id = self.id();
                                    peer.with_fields_mut(|pf| pf.mirror_unlink(inverse_field, self_id.as_deref().unwrap_or_default()));
                                }
                            }
                        }
                    })
                } else {
                    Some(quote! {
                        pub fn #getter(&self) -> ::entitygraph::field::FieldValue<::entitygraph::entity::Entity<#peer>> {
                            self.with_fields(|f| f.#ident.clone())
                        }

                        /// Replaces the single peer, mirroring unlink onto the previous
                        /// peer and link onto the new one when each is already loaded
                        /// with its inverse field received.
                        pub fn #setter(&self, value: ::entitygraph::field::FieldValue<::entitygraph::entity::Entity<#peer>>) {
                            let previous = self.with_fields(|f| f.#ident.clone()).into_option();
                            let next = value.as_ref().into_option().cloned();
                            self.with_fields_mut(|f| f.#ident = value);
                            let inverse_field: Option<&'static str> = #inverse_field_expr;
                            if let Some(inverse_field) = inverse_field {
                                let self_id = self.id();
                                if let Some(old) = &previous {
                                    if next.as_ref().map(|n| n.id()) != Some(old.id()) && old.has_received(inverse_field) {
                                        old.with_fields_mut(|pf| pf.mirror_unlink(inverse_field, self_id.as_deref().unwrap_or_default()));
                                    }
                                }
                                if let Some(new) = &next {
                                    if previous.as_ref().map(|p| p.id()) != Some(new.id()) && new.has_received(inverse_field) {
                                        let boxed: Box<dyn ::std::any::Any + Send + Sync> = Box::new(self.clone());
                                        new.with_fields_mut(|pf| pf.mirror_link(inverse_field, boxed));
                                    }
                                }
                            }
                        }
                    })
                }
            }
            FieldKind::Tracked { .. } | FieldKind::Plain => {
                let ty = &f.ty;
                Some(quote! {
                    pub fn #getter(&self) -> #ty {
                        self.with_fields(|f| f.#ident.clone())
                    }

                    pub fn #setter(&self, value: #ty) {
                        self.with_fields_mut(|f| f.#ident = value);
                    }
                })
            }
        }
    });

    quote! {
        impl ::entitygraph::entity::Entity<#struct_name> {
            #(#methods)*
        }
    }
}
