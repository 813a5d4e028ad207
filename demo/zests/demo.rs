//! Demo zests for the checkout library.
//!
//! Run with `cargo test -p zest-demo`, or pass runner flags after `--`:
//!
//! ```text
//! cargo test -p zest-demo -- -v --capture
//! cargo test -p zest-demo -- --allow zest_cart.zest_totals
//! cargo test -p zest-demo -- --bypass-skip "no warehouse in the demo"
//! ```

use std::cell::{Cell, RefCell};
use std::io::Write;
use zest::decorators::{retry, skip};
use zest::mock::mock;
use zest::raises::raises;
use zest::{call, zest, zest_main, Failure, TestResult, Zest};
use zest_demo::{catalog, Cart, CheckoutError};

#[zest]
fn zest_cart(z: &mut Zest<'_>) -> TestResult {
    let catalog = catalog();
    let cart = RefCell::new(Cart::new(catalog.clone()));

    let mut s = z.scope();

    s.before(|_z: &mut Zest<'_>| {
        *cart.borrow_mut() = Cart::new(catalog.clone());
    });

    s.test("it_starts_empty", |_z: &mut Zest<'_>| {
        assert_eq!(cart.borrow().n_items(), 0);
    });

    s.test("it_counts_items", |_z: &mut Zest<'_>| -> TestResult {
        let mut cart = cart.borrow_mut();
        cart.add("apple", 2)?;
        cart.add("apple", 1)?;
        assert_eq!(cart.n_items(), 3);
        Ok(())
    });

    s.test("it_rejects_non_positive_quantities", |_z: &mut Zest<'_>| -> TestResult {
        let trapped = raises::<CheckoutError>()
            .attr_eq("quantity", -1)
            .run(|| cart.borrow_mut().add("pear", -1))?;
        assert_eq!(*trapped, CheckoutError::BadQuantity { quantity: -1 });
        Ok(())
    });

    s.test("zest_totals", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();

        // the outer _before only runs once for this whole group
        s.before(|_z: &mut Zest<'_>| {
            *cart.borrow_mut() = Cart::new(catalog.clone());
        });

        s.test("it_prices_from_the_catalog", |_z: &mut Zest<'_>| -> anyhow::Result<()> {
            let mut cart = cart.borrow_mut();
            cart.add("apple", 2)?;
            cart.add("pear", 1)?;
            assert_eq!(cart.total()?, 175);
            Ok(())
        });

        s.test("it_uses_the_mocked_price", |_z: &mut Zest<'_>| -> anyhow::Result<()> {
            let m = mock(&catalog);
            m.returns(10);
            cart.borrow_mut().add("apple", 3)?;
            assert_eq!(cart.borrow().total()?, 30);
            assert!(m.called_once_with(&call!("apple")));
            Ok(())
        });

        s.test("it_reports_unknown_skus", |_z: &mut Zest<'_>| -> TestResult {
            cart.borrow_mut().add("durian", 1)?;
            let trapped = raises::<CheckoutError>()
                .in_args("dur")
                .run(|| cart.borrow().total())?;
            assert_eq!(trapped.to_string(), "unknown sku durian");
            Ok(())
        });

        s.test("it_surfaces_catalog_outages", |_z: &mut Zest<'_>| -> TestResult {
            let m = mock(&catalog);
            m.exceptions(CheckoutError::CatalogDown);
            cart.borrow_mut().add("pear", 1)?;
            raises::<CheckoutError>()
                .in_args("unavailable")
                .run(|| cart.borrow().total())?;
            Ok(())
        });

        s.run()?;
        Ok(())
    });

    s.run()?;
    Ok(())
}

#[zest(group = "lifecycle")]
fn zest_lifecycle(z: &mut Zest<'_>) -> TestResult {
    let catalog = catalog();
    // reset before each nested test, restored when this group ends
    let prices = z.stack_mock(&catalog, true);
    prices.returns(1);
    let attempts = Cell::new(0);

    let mut s = z.scope();

    s.after(|z: &mut Zest<'_>| {
        if let Some(err) = z.current_test_error() {
            let _ = writeln!(z.stderr(), "{} failed: {}", z.current_test_full_name(), err);
        }
    });

    s.test("it_sees_a_fresh_mock", |_z: &mut Zest<'_>| -> anyhow::Result<()> {
        assert!(prices.not_called());
        assert_eq!(catalog.call(call!("apple"))?, 1);
        assert!(prices.called_once());
        Ok(())
    });

    s.test("it_sees_a_fresh_mock_again", |_z: &mut Zest<'_>| -> anyhow::Result<()> {
        assert!(prices.not_called());
        assert_eq!(catalog.call(call!("pear"; note = "second"))?, 1);
        let normalized = prices.normalized_call()?;
        assert_eq!(normalized["sku"], "pear");
        assert_eq!(normalized["note"], "second");
        Ok(())
    });

    s.test("it_writes_captured_output", |z: &mut Zest<'_>| -> TestResult {
        writeln!(z.stdout(), "only shown on failure when --capture is on")?;
        assert!(z.work_dir().is_dir());
        Ok(())
    });

    s.test(
        "it_needs_a_warehouse",
        skip("no warehouse in the demo", |_z: &mut Zest<'_>| -> TestResult {
            Err(Failure::msg("there is no warehouse to talk to"))
        }),
    );

    s.test(
        "it_settles_on_retry",
        retry(3, |_z: &mut Zest<'_>| {
            attempts.set(attempts.get() + 1);
            assert!(attempts.get() >= 2, "still warming up");
        }),
    );

    s.run()?;
    Ok(())
}

#[zest(name = "zest_named_root", skip = "shows a skipped root")]
fn skipped_root(_z: &mut Zest<'_>) {
    panic!("a skipped root never runs");
}

zest_main!();
