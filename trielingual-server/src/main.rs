use std::path::{Path, PathBuf};
use std::sync::RwLock;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, middleware, put, web};

use serde::{Deserialize, Serialize};
use trielingual_core::io::{BINARY_EXTENSION, get_filename, list_files, load_trie, normalize_folder};
use trielingual_core::{ExampleRecord, TrieNode};

/// Trie file extensions served from the data directory.
const TRIE_EXTENSIONS: [&str; 2] = ["json", BINARY_EXTENSION];

/// Query parameters of `/v1/lookup`
#[derive(Deserialize)]
struct LookupParams {
	/// Comma-separated token path, e.g. `le,chat`
	path: Option<String>,
	/// Maximum number of children returned, most frequent first
	limit: Option<usize>,
}

#[derive(Deserialize)]
struct LoadQuery {
	name: Option<String>,
}

#[derive(Serialize)]
struct ChildSummary<'a> {
	token: &'a str,
	count: u64,
	children: usize,
}

#[derive(Serialize)]
struct NodeView<'a> {
	path: Vec<&'a str>,
	count: u64,
	level: Option<u32>,
	examples: Vec<&'a ExampleRecord>,
	children: Vec<ChildSummary<'a>>,
}

struct SharedData {
	data_dir: PathBuf,
	trie: TrieNode,
	name: Option<String>,
}

/// Finds `name` with one of the trie extensions in `data_dir`.
fn trie_path(data_dir: &Path, name: &str) -> Option<PathBuf> {
	TRIE_EXTENSIONS
		.iter()
		.map(|ext| data_dir.join(format!("{name}.{ext}")))
		.find(|path| path.is_file())
}

/// HTTP GET endpoint `/v1/lookup`
///
/// Returns the node at `path` with its count, level, examples and children
/// sorted by count. An empty path returns the top-level words.
#[get("/v1/lookup")]
async fn get_lookup(data: web::Data<RwLock<SharedData>>, query: web::Query<LookupParams>) -> impl Responder {
	let shared_data = match data.read() {
		Ok(d) => d,
		Err(_) => return HttpResponse::InternalServerError().body("Trie lock failed"),
	};

	let path: Vec<&str> = query
		.path
		.as_deref()
		.unwrap_or("")
		.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.collect();

	let Some(node) = shared_data.trie.get_path(&path) else {
		return HttpResponse::NotFound().body(format!("No n-gram '{}'", path.join(" ")));
	};

	let limit = query.limit.unwrap_or(usize::MAX);
	let children = node
		.children_by_count()
		.into_iter()
		.take(limit)
		.map(|(token, child)| ChildSummary { token, count: child.count(), children: child.child_count() })
		.collect();

	HttpResponse::Ok().json(NodeView {
		path,
		count: node.count(),
		level: node.level(),
		examples: node.examples(),
		children,
	})
}

#[get("/v1/tries")]
async fn get_tries(data: web::Data<RwLock<SharedData>>) -> impl Responder {
	let data_dir = match data.read() {
		Ok(d) => d.data_dir.clone(),
		Err(_) => return HttpResponse::InternalServerError().body("Trie lock failed"),
	};
	match list_files(&data_dir, &TRIE_EXTENSIONS) {
		Ok(files) => {
			let mut names: Vec<String> = files.iter().filter_map(|file| get_filename(file).ok()).collect();
			names.dedup();
			HttpResponse::Ok().body(names.join("\n"))
		}
		Err(_) => HttpResponse::InternalServerError().body("Failed to list tries"),
	}
}

#[get("/v1/loaded")]
async fn get_loaded(data: web::Data<RwLock<SharedData>>) -> impl Responder {
	let shared_data = match data.read() {
		Ok(d) => d,
		Err(_) => return HttpResponse::InternalServerError().body("Trie lock failed"),
	};
	HttpResponse::Ok().body(shared_data.name.clone().unwrap_or_default())
}

#[put("/v1/load")]
async fn put_load(data: web::Data<RwLock<SharedData>>, query: web::Query<LoadQuery>) -> impl Responder {
	let name = match &query.name {
		Some(s) if !s.trim().is_empty() => s.trim(),
		_ => return HttpResponse::BadRequest().body("Missing or empty trie name"),
	};
	if name.contains(['/', '\\']) || name.starts_with('.') {
		return HttpResponse::BadRequest().body("Invalid trie name");
	}

	let data_dir = match data.read() {
		Ok(d) => d.data_dir.clone(),
		Err(_) => return HttpResponse::InternalServerError().body("Trie lock failed"),
	};
	let Some(path) = trie_path(&data_dir, name) else {
		return HttpResponse::NotFound().body(format!("No trie named '{name}'"));
	};

	// Load on the blocking pool, outside the lock, so lookups keep being served meanwhile
	let load_path = path.clone();
	let trie = match web::block(move || load_trie(&load_path)).await {
		Ok(Ok(t)) => t,
		Ok(Err(e)) => return HttpResponse::InternalServerError().body(format!("Failed to load trie: {e}")),
		Err(_) => return HttpResponse::InternalServerError().body("Trie loading was interrupted"),
	};
	log::info!("Loaded {} ({} top-level words)", path.display(), trie.child_count());

	let mut shared_data = match data.write() {
		Ok(d) => d,
		Err(_) => return HttpResponse::InternalServerError().body("Trie lock failed"),
	};
	shared_data.trie = trie;
	shared_data.name = Some(name.to_owned());

	HttpResponse::Ok().body("Trie loaded successfully")
}

/// Main entry point for the server.
///
/// Serves read-only lookups over one trie at a time, chosen among the files
/// of the data directory (`TRIELINGUAL_DATA_DIR`, default `./data`).
/// The server binds to 127.0.0.1:5000.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let data_dir = normalize_folder(&std::env::var("TRIELINGUAL_DATA_DIR").unwrap_or_else(|_| "./data".to_owned()));
	log::info!("Serving tries from {}", data_dir.display());

	let shared_data = SharedData { data_dir, trie: TrieNode::new(), name: None };
	let shared_trie = web::Data::new(RwLock::new(shared_data));

	HttpServer::new(move || {
		App::new()
			.wrap(Cors::permissive())
			.wrap(middleware::Logger::default())
			.app_data(shared_trie.clone())
			.service(get_lookup)
			.service(get_tries)
			.service(get_loaded)
			.service(put_load)
	})
		.bind(("127.0.0.1", 5000))?
		.run()
		.await
}

#[cfg(test)]
mod tests {
	use actix_web::test;

	use super::*;

	fn sample_data(data_dir: PathBuf) -> web::Data<RwLock<SharedData>> {
		let mut trie = TrieNode::new();
		let chat = trie.child_or_insert("chat");
		*chat = serde_json::from_str(r#"{"__C": 5, "__l": 1, "noir": {"__C": 3}, "gris": {"__C": 1}}"#).unwrap();
		web::Data::new(RwLock::new(SharedData { data_dir, trie, name: Some("fr".to_owned()) }))
	}

	#[actix_web::test]
	async fn test_lookup_returns_children_by_count() {
		let app = test::init_service(App::new().app_data(sample_data(PathBuf::from("."))).service(get_lookup)).await;
		let req = test::TestRequest::get().uri("/v1/lookup?path=chat&limit=1").to_request();
		let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
		assert_eq!(body["count"], 5);
		assert_eq!(body["level"], 1);
		assert_eq!(body["children"], serde_json::json!([{"token": "noir", "count": 3, "children": 0}]));
	}

	#[actix_web::test]
	async fn test_lookup_unknown_path_is_not_found() {
		let app = test::init_service(App::new().app_data(sample_data(PathBuf::from("."))).service(get_lookup)).await;
		let req = test::TestRequest::get().uri("/v1/lookup?path=chien").to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
	}

	#[actix_web::test]
	async fn test_load_and_list_tries() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("de.json"), r#"{"hund": {"__C": 2}}"#).unwrap();
		let data = sample_data(dir.path().to_path_buf());
		let app = test::init_service(
			App::new().app_data(data.clone()).service(get_tries).service(put_load).service(get_loaded),
		)
		.await;

		let req = test::TestRequest::get().uri("/v1/tries").to_request();
		assert_eq!(test::call_and_read_body(&app, req).await, "de");

		let req = test::TestRequest::put().uri("/v1/load?name=de").to_request();
		assert!(test::call_service(&app, req).await.status().is_success());

		let req = test::TestRequest::get().uri("/v1/loaded").to_request();
		assert_eq!(test::call_and_read_body(&app, req).await, "de");
		assert_eq!(data.read().unwrap().trie.child("hund").unwrap().count(), 2);

		let req = test::TestRequest::put().uri("/v1/load?name=../de").to_request();
		assert_eq!(test::call_service(&app, req).await.status(), actix_web::http::StatusCode::BAD_REQUEST);
	}

	#[actix_web::test]
	async fn test_failed_load_keeps_current_trie() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("broken.json"), r#"{"hund": 2}"#).unwrap();
		let data = sample_data(dir.path().to_path_buf());
		let app = test::init_service(App::new().app_data(data.clone()).service(put_load)).await;

		let req = test::TestRequest::put().uri("/v1/load?name=broken").to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);

		let shared_data = data.read().unwrap();
		assert_eq!(shared_data.name.as_deref(), Some("fr"));
		assert!(shared_data.trie.child("chat").is_some());
	}
}
