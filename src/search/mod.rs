//! Tantivy-based catalog search.
//!
//! Products, recipes and videos share one index; each document carries its
//! kind so results can be returned as a flat list and filtered by kind.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::{Product, Recipe, Video};

const BOOST_TITLE: f32 = 10.0;
const BOOST_CATEGORY: f32 = 4.0;
const BOOST_BODY: f32 = 2.0;

/// Deepest result position a search can page to.
pub const MAX_RESULT_WINDOW: usize = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Product,
    Recipe,
    Video,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Product => "product",
            SearchKind::Recipe => "recipe",
            SearchKind::Video => "video",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "product" => Some(SearchKind::Product),
            "recipe" => Some(SearchKind::Recipe),
            "video" => Some(SearchKind::Video),
            _ => None,
        }
    }
}

/// One entry of the flattened search result list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub kind: SearchKind,
    pub id: String,
    pub title: String,
    pub score: f32,
}

struct SearchFields {
    /// `kind:id`, unique per document, used for replacement and deletion
    doc_key: Field,
    kind: Field,
    entity_id: Field,
    title: Field,
    category: Field,
    body: Field,
}

/// Catalog search index.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let doc_key = schema_builder.add_text_field("doc_key", STRING);
        let kind = schema_builder.add_text_field("kind", STRING | STORED);
        let entity_id = schema_builder.add_text_field("entity_id", STORED);
        let title = schema_builder.add_text_field("title", TEXT | STORED);
        let category = schema_builder.add_text_field("category", TEXT);
        let body = schema_builder.add_text_field("body", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            doc_key,
            kind,
            entity_id,
            title,
            category,
            body,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the whole index from the catalog.
    pub async fn rebuild(
        &self,
        products: &[Product],
        recipes: &[Recipe],
        videos: &[Video],
    ) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;
        writer.delete_all_documents()?;

        for product in products {
            writer.add_document(self.product_document(product))?;
        }
        for recipe in recipes {
            writer.add_document(self.recipe_document(recipe))?;
        }
        for video in videos {
            writer.add_document(self.video_document(video))?;
        }

        writer.commit()?;
        self.reader.reload()?;

        tracing::info!(
            products = products.len(),
            recipes = recipes.len(),
            videos = videos.len(),
            "Search index rebuilt"
        );
        Ok(())
    }

    pub async fn index_product(&self, product: &Product) -> Result<(), AppError> {
        self.replace(SearchKind::Product, &product.id, self.product_document(product))
            .await
    }

    pub async fn index_recipe(&self, recipe: &Recipe) -> Result<(), AppError> {
        self.replace(SearchKind::Recipe, &recipe.id, self.recipe_document(recipe))
            .await
    }

    pub async fn index_video(&self, video: &Video) -> Result<(), AppError> {
        self.replace(SearchKind::Video, &video.id, self.video_document(video))
            .await
    }

    /// Remove an entity from the index.
    pub async fn remove(&self, kind: SearchKind, id: &str) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;
        writer.delete_term(self.key_term(kind, id));
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    async fn replace(
        &self,
        kind: SearchKind,
        id: &str,
        document: TantivyDocument,
    ) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;
        writer.delete_term(self.key_term(kind, id));
        writer.add_document(document)?;
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Search the catalog, optionally restricted to one kind.
    pub fn search(
        &self,
        query_str: &str,
        kind: Option<SearchKind>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        if query_str.trim().is_empty() || limit == 0 || offset >= MAX_RESULT_WINDOW {
            return Ok(Vec::new());
        }
        let window = limit.saturating_add(offset).min(MAX_RESULT_WINDOW);

        let searcher = self.reader.searcher();

        let mut text_queries: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for (field, boost) in [
            (self.fields.title, BOOST_TITLE),
            (self.fields.category, BOOST_CATEGORY),
            (self.fields.body, BOOST_BODY),
        ] {
            let parser = QueryParser::for_index(&self.index, vec![field]);
            // Lenient parsing: stray operators in user input must not fail the search
            let (field_query, _errors) = parser.parse_query_lenient(query_str);
            text_queries.push((Occur::Should, Box::new(BoostQuery::new(field_query, boost))));
        }

        let text_query: Box<dyn Query> = Box::new(BooleanQuery::new(text_queries));

        let query: Box<dyn Query> = match kind {
            Some(kind) => {
                let kind_term = Term::from_field_text(self.fields.kind, kind.as_str());
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, text_query),
                    (
                        Occur::Must,
                        Box::new(TermQuery::new(kind_term, IndexRecordOption::Basic)),
                    ),
                ]))
            }
            None => text_query,
        };

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(window))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let hits = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, address)| {
                let doc: TantivyDocument = searcher.doc(address).ok()?;
                let kind = SearchKind::from_str(doc.get_first(self.fields.kind)?.as_str()?)?;
                let id = doc.get_first(self.fields.entity_id)?.as_str()?.to_string();
                let title = doc.get_first(self.fields.title)?.as_str()?.to_string();
                Some(SearchHit {
                    kind,
                    id,
                    title,
                    score,
                })
            })
            .collect();

        Ok(hits)
    }

    fn key_term(&self, kind: SearchKind, id: &str) -> Term {
        Term::from_field_text(self.fields.doc_key, &format!("{}:{}", kind.as_str(), id))
    }

    fn document(
        &self,
        kind: SearchKind,
        id: &str,
        title: &str,
        category: Option<&str>,
        body: String,
    ) -> TantivyDocument {
        doc!(
            self.fields.doc_key => format!("{}:{}", kind.as_str(), id),
            self.fields.kind => kind.as_str().to_string(),
            self.fields.entity_id => id.to_string(),
            self.fields.title => title.to_string(),
            self.fields.category => category.unwrap_or_default().to_string(),
            self.fields.body => body
        )
    }

    fn product_document(&self, product: &Product) -> TantivyDocument {
        let body = [product.description.as_deref(), product.unit.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        self.document(
            SearchKind::Product,
            &product.id,
            &product.name,
            product.category.as_deref(),
            body,
        )
    }

    fn recipe_document(&self, recipe: &Recipe) -> TantivyDocument {
        let body = [recipe.description.as_deref(), recipe.instructions.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        self.document(
            SearchKind::Recipe,
            &recipe.id,
            &recipe.title,
            recipe.category.as_deref(),
            body,
        )
    }

    fn video_document(&self, video: &Video) -> TantivyDocument {
        self.document(
            SearchKind::Video,
            &video.id,
            &video.title,
            None,
            video.description.clone().unwrap_or_default(),
        )
    }
}
