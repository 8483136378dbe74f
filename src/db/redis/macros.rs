/// Cache-aside over the unified cache surface.
///
/// Checks the cache for `$key`; on a hit the cached value is returned, on a
/// miss `$block` computes the value, which is stored with `$ttl` and the
/// given tags before being returned. Cache failures surface as misses, so
/// the block is the source of truth.
///
/// # Arguments
/// * `$cache`: the [`Cache`](crate::db::Cache) instance.
/// * `$key`: a [`CacheKey`](crate::db::CacheKey).
/// * `$ttl`: time-to-live in seconds.
/// * `$tags`: slice of [`CacheTag`](crate::db::CacheTag)s for invalidation.
/// * `$block`: async block producing an `AppResult` on miss.
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $tags:expr, $block:expr) => {{
        if let Some(cached) = $cache.get(&$key).await {
            tracing::debug!(key = %$key, "cache hit");
            Ok(cached)
        } else {
            let value = $block.await?;
            $cache.set_with_tags(&$key, &value, $ttl, $tags);
            Ok(value)
        }
    }};
}
