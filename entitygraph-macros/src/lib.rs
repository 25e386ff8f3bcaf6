use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod entity_macro;

/// Derives the `Trackable`, `EntityFields`, and `EntityMetadata` impls a
/// concrete entity's field struct needs, plus typed getter/setter
/// accessors on `Entity<Self>`.
///
/// ```text
/// #[derive(entitygraph::Entity)]
/// #[entity(type_name = "Scene", create_input = "SceneCreateInput", update_input = "SceneUpdateInput")]
/// struct SceneFields {
///     #[entity(id)]
///     id: Option<String>,
///     #[entity(tracked, input_key = "rating100")]
///     rating: entitygraph::FieldValue<i32>,
///     #[entity(relationship, target = "PerformerFields", target_field = "performer_ids", list, inverse_query_field = "scenes")]
///     performers: entitygraph::FieldValue<Vec<entitygraph::Entity<PerformerFields>>>,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match entity_macro::expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
